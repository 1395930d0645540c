//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building workflow descriptions from `(name, dependencies)` lists
//! - A harness that owns a workflow manager wired to a mock worker
//! - Predefined graphs (fan-out, diamond, chain)

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use wfengine::core::resource::Resource;
use wfengine::core::task::{TaskId, TaskState};
use wfengine::monitor::StaticResourceMonitor;
use wfengine::orchestration::{RetryPolicy, Scheduler, TaskManager, TickReport, WorkflowManager};
use wfengine::worker::MockWorker;
use wfengine::workflow::{TaskSpec, Workflow, WorkflowSpec, WorkflowStatus};

/// A task description with the given dependencies and a trivial command.
pub fn task_spec(name: &str, depends_on: &[&str]) -> TaskSpec {
    TaskSpec {
        name: name.to_string(),
        command: "true".to_string(),
        args: Vec::new(),
        depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        requirements: Default::default(),
    }
}

/// A workflow description from `(name, dependencies)` pairs.
pub fn workflow_spec(name: &str, tasks: &[(&str, &[&str])]) -> WorkflowSpec {
    WorkflowSpec {
        name: name.to_string(),
        tasks: tasks.iter().map(|(n, deps)| task_spec(n, deps)).collect(),
        outputs: Vec::new(),
    }
}

/// A with dependents B and C.
pub fn fan_out_spec() -> WorkflowSpec {
    workflow_spec("fan-out", &[("A", &[]), ("B", &["A"]), ("C", &["A"])])
}

/// root -> {left, right} -> join
pub fn diamond_spec() -> WorkflowSpec {
    workflow_spec(
        "diamond",
        &[
            ("root", &[]),
            ("left", &["root"]),
            ("right", &["root"]),
            ("join", &["left", "right"]),
        ],
    )
}

/// A workflow manager over a mock worker, with a temporary profile directory.
pub struct Harness {
    pub worker: Arc<MockWorker>,
    pub manager: WorkflowManager,
    pub profile_dir: TempDir,
}

impl Harness {
    pub fn new(spec: WorkflowSpec, worker: MockWorker, resources: Vec<Resource>) -> Self {
        Self::with_retry(spec, worker, resources, RetryPolicy::immediate(3))
    }

    pub fn with_retry(
        spec: WorkflowSpec,
        worker: MockWorker,
        resources: Vec<Resource>,
        retry: RetryPolicy,
    ) -> Self {
        let worker = Arc::new(worker);
        let profile_dir = TempDir::new().expect("Failed to create temp directory");
        let workflow = Workflow::from_spec(spec).expect("Invalid workflow spec");
        let manager = WorkflowManager::new(
            workflow,
            TaskManager::new(worker.clone(), retry),
            Arc::new(StaticResourceMonitor::new(resources)),
        )
        .with_scheduler(Scheduler::with_seed(17))
        .with_tick_interval(Duration::from_millis(1))
        .with_profile_dir(Some(profile_dir.path().to_path_buf()));

        Self {
            worker,
            manager,
            profile_dir,
        }
    }

    pub fn task_id(&self, name: &str) -> TaskId {
        self.manager
            .workflow()
            .dag
            .task_by_name(name)
            .unwrap_or_else(|| panic!("no task named {}", name))
            .id
    }

    pub fn state(&self, name: &str) -> TaskState {
        self.manager
            .workflow()
            .dag
            .task_by_name(name)
            .unwrap_or_else(|| panic!("no task named {}", name))
            .state
    }

    pub async fn tick(&mut self) -> TickReport {
        self.manager.tick().await.expect("tick failed")
    }

    /// Tick until the workflow is terminal, returning every report.
    pub async fn run_to_end(&mut self, max_ticks: usize) -> Vec<TickReport> {
        let mut reports = Vec::new();
        for _ in 0..max_ticks {
            let report = self.tick().await;
            let done = report.status.is_terminal();
            reports.push(report);
            if done {
                return reports;
            }
        }
        panic!(
            "workflow still {} after {} ticks",
            self.manager.status(),
            max_ticks
        );
    }

    pub fn status(&self) -> WorkflowStatus {
        self.manager.status()
    }
}
