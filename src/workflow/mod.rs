//! Workflow lifecycle types.
//!
//! A workflow owns its task graph and a status that moves through
//! INITIALIZING, PENDING, RUNNING and PAUSED to a terminal status.

mod state;
mod types;

pub use state::{derive_status, StateHistoryEntry};
pub use types::{TaskSpec, Workflow, WorkflowId, WorkflowSpec, WorkflowStatus};
