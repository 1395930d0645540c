//! Core workflow type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::core::dag::TaskDAG;
use crate::core::task::{Task, TaskRequirements};
use crate::error::{Error, Result};

use super::state::StateHistoryEntry;

/// Unique identifier for a workflow instance.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    /// Create a new unique workflow identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Status of a workflow in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    /// Workflow submitted, graph not yet validated
    #[default]
    Initializing,
    /// Graph validated, waiting for start
    Pending,
    /// Orchestration loop is submitting and polling
    Running,
    /// No new submissions; in-flight jobs are still polled
    Paused,
    /// Cancelled by request
    Cancelled,
    /// Every task completed or was cancelled
    Completed,
    /// A task failed and nothing else can make progress
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Cancelled | WorkflowStatus::Completed | WorkflowStatus::Failed
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Initializing => write!(f, "INITIALIZING"),
            WorkflowStatus::Pending => write!(f, "PENDING"),
            WorkflowStatus::Running => write!(f, "RUNNING"),
            WorkflowStatus::Paused => write!(f, "PAUSED"),
            WorkflowStatus::Cancelled => write!(f, "CANCELLED"),
            WorkflowStatus::Completed => write!(f, "COMPLETED"),
            WorkflowStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Serialized task description handed over by the workflow parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Names of the tasks this one depends on.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub requirements: TaskRequirements,
}

/// Serialized workflow: task graph plus metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl WorkflowSpec {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A workflow: one DAG of tasks tracked as a unit.
#[derive(Debug)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub dag: TaskDAG,
    /// Declared workflow outputs.
    pub outputs: Vec<String>,
    pub(super) status: WorkflowStatus,
    pub(super) history: Vec<StateHistoryEntry>,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    /// Create an empty workflow in INITIALIZING.
    pub fn new(name: &str) -> Self {
        Self {
            id: WorkflowId::new(),
            name: name.to_string(),
            dag: TaskDAG::new(),
            outputs: Vec::new(),
            status: WorkflowStatus::Initializing,
            history: vec![StateHistoryEntry::now(WorkflowStatus::Initializing)],
            created_at: Utc::now(),
        }
    }

    /// Build a workflow from its serialized description.
    ///
    /// The graph is validated (unique names, known dependencies, no cycles)
    /// and the workflow ends up PENDING.
    pub fn from_spec(spec: WorkflowSpec) -> Result<Self> {
        let mut workflow = Self::new(&spec.name);
        workflow.outputs = spec.outputs;

        let mut ids = HashMap::new();
        for task_spec in &spec.tasks {
            let task = Task::new(&task_spec.name, &task_spec.command)
                .with_args(task_spec.args.iter().cloned())
                .with_requirements(task_spec.requirements.clone());
            let id = workflow.dag.add_task(task)?;
            ids.insert(task_spec.name.as_str(), id);
        }

        for task_spec in &spec.tasks {
            let to = ids[task_spec.name.as_str()];
            for dep in &task_spec.depends_on {
                let from = ids.get(dep.as_str()).ok_or_else(|| {
                    Error::Validation(format!(
                        "Task {} depends on unknown task {}",
                        task_spec.name, dep
                    ))
                })?;
                workflow.dag.add_dependency(from, &to)?;
            }
        }

        workflow.transition(WorkflowStatus::Pending)?;
        Ok(workflow)
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    /// Every status the workflow has been in, oldest first.
    pub fn history(&self) -> &[StateHistoryEntry] {
        &self.history
    }
}
