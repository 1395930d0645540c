//! Orchestration layer of the workflow engine.
//!
//! The scheduler places ready tasks on resources, the task manager turns
//! placements into jobs and tracks them, and the workflow manager drives
//! both from a periodic tick.

mod retry;
pub mod scheduler;
pub mod task_manager;
pub mod workflow_manager;

pub use retry::RetryPolicy;
pub use scheduler::Scheduler;
pub use task_manager::{CancelOutcome, SubmissionState, TaskManager, TaskUpdate};
pub use workflow_manager::{drive, SharedWorkflow, TickReport, WorkflowManager};
