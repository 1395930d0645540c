//! Core domain models for the workflow engine.
//!
//! Tasks and their dependency graph, compute resources, allocations and
//! job handles. Nothing in here performs I/O.

pub mod dag;
pub mod job;
pub mod resource;
pub mod task;

pub use dag::TaskDAG;
pub use job::{Job, JobId, JobState};
pub use resource::{Allocation, AllocationMap, Resource, ResourceId};
pub use task::{Task, TaskId, TaskRequirements, TaskState};
