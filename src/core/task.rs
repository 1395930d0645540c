//! Task data model for the workflow graph.
//!
//! Tasks are the atomic units of work submitted to a workload manager.
//! Each task tracks its command line, placement requirements, and a
//! lifecycle state whose transitions are checked mechanically.

use crate::core::resource::ResourceId;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task within a workflow.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task state in its lifecycle.
///
/// Transitions are monotonic: PENDING moves forward to RUNNING or a
/// terminal state, and the only backward edge is PAUSED -> RUNNING,
/// driven by workflow pause/resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Waiting for dependencies or for submission.
    #[default]
    Pending,
    /// Submitted to the workload manager.
    Running,
    /// Job observed COMPLETED.
    Completed,
    /// Job failed or submission was exhausted.
    Failed,
    /// Held by a paused workflow while its job keeps running.
    Paused,
    /// Cancelled explicitly or as a consequence of an upstream failure.
    Cancelled,
}

impl TaskState {
    /// Check if the state is terminal (Completed, Failed or Cancelled).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Check if moving from `self` to `next` is a legal transition.
    ///
    /// Re-entering the current state is always accepted.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Running | Failed | Cancelled)
                | (Running, Completed | Failed | Cancelled | Paused)
                | (Paused, Running | Completed | Failed | Cancelled)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "PENDING"),
            TaskState::Running => write!(f, "RUNNING"),
            TaskState::Completed => write!(f, "COMPLETED"),
            TaskState::Failed => write!(f, "FAILED"),
            TaskState::Paused => write!(f, "PAUSED"),
            TaskState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Placement requirements declared by a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequirements {
    /// Class of resource the task needs (e.g. "cpu", "gpu").
    #[serde(default)]
    pub resource_class: Option<String>,
    /// Preferred resource for cold-start placement.
    #[serde(default)]
    pub affinity: Option<ResourceId>,
}

/// A single task in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Human-readable name, unique within the workflow.
    pub name: String,
    /// Base command to execute.
    pub command: String,
    /// Arguments appended to the command.
    pub args: Vec<String>,
    /// Placement requirements.
    pub requirements: TaskRequirements,
    /// Current lifecycle state.
    pub state: TaskState,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task was first submitted.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task with the given name and command.
    pub fn new(name: &str, command: &str) -> Self {
        Self {
            id: TaskId::new(),
            name: name.to_string(),
            command: command.to_string(),
            args: Vec::new(),
            requirements: TaskRequirements::default(),
            state: TaskState::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Builder-style argument list.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style placement requirements.
    pub fn with_requirements(mut self, requirements: TaskRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    /// Move the task to `next`, recording timestamps.
    ///
    /// # Errors
    /// Returns `Error::InvalidTransition` if the move breaks monotonicity.
    pub fn transition(&mut self, next: TaskState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                entity: "task",
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        if next == TaskState::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
        self.state = next;
        Ok(())
    }

    /// Check if the task is in a terminal state.
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}
