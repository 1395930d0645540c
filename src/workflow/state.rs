//! Workflow status transitions and status derivation.
//!
//! Explicit transitions (start, pause, resume, cancel) are checked against a
//! fixed table. Completion and failure are never requested; they are derived
//! from the multiset of task states after every tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::task::TaskState;
use crate::error::{Error, Result};
use crate::wlog_debug;

use super::{Workflow, WorkflowStatus};

/// A record of a status change with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    /// The status that was entered.
    pub status: WorkflowStatus,
    /// When this status was entered.
    pub entered_at: DateTime<Utc>,
}

impl StateHistoryEntry {
    pub(crate) fn now(status: WorkflowStatus) -> Self {
        Self {
            status,
            entered_at: Utc::now(),
        }
    }
}

impl WorkflowStatus {
    /// Check if a transition to `target` is valid from the current status.
    ///
    /// - Initializing -> Pending
    /// - Pending -> Running
    /// - Running <-> Paused
    /// - Running | Paused -> Completed | Failed
    /// - any non-terminal -> Cancelled
    pub fn can_transition_to(self, target: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, target),
            (Initializing, Pending)
                | (Pending, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running | Paused, Completed | Failed)
                | (_, Cancelled)
        )
    }
}

impl Workflow {
    /// Move the workflow to `target`, appending to its history.
    ///
    /// Re-entering the current status is a no-op.
    pub fn transition(&mut self, target: WorkflowStatus) -> Result<()> {
        if self.status == target {
            return Ok(());
        }
        if !self.status.can_transition_to(target) {
            return Err(Error::InvalidTransition {
                entity: "workflow",
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }
        wlog_debug!("workflow {} {} -> {}", self.id.short(), self.status, target);
        self.status = target;
        self.history.push(StateHistoryEntry::now(target));
        Ok(())
    }
}

/// Derive a running workflow's status from its task states.
///
/// - CANCELLED if cancellation was requested
/// - FAILED if some task failed and no task is PENDING, RUNNING or PAUSED
/// - COMPLETED if every task is COMPLETED or CANCELLED
/// - otherwise PAUSED or RUNNING depending on `paused`
pub fn derive_status(states: &[TaskState], cancel_requested: bool, paused: bool) -> WorkflowStatus {
    if cancel_requested {
        return WorkflowStatus::Cancelled;
    }

    let in_flight = states.iter().any(|s| {
        matches!(
            s,
            TaskState::Pending | TaskState::Running | TaskState::Paused
        )
    });
    let any_failed = states.contains(&TaskState::Failed);

    if any_failed && !in_flight {
        WorkflowStatus::Failed
    } else if !in_flight {
        WorkflowStatus::Completed
    } else if paused {
        WorkflowStatus::Paused
    } else {
        WorkflowStatus::Running
    }
}
