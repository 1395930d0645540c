//! Full runs through `WorkflowService`, the way the REST layer drives it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use wfengine::api::{PatchOption, WorkflowService};
use wfengine::config::{Config, WorkerBackend};
use wfengine::core::resource::Resource;
use wfengine::monitor::StaticResourceMonitor;
use wfengine::orchestration::{RetryPolicy, Scheduler, TaskManager, WorkflowManager};
use wfengine::profiler::Profiler;
use wfengine::worker::MockWorker;
use wfengine::workflow::{WorkflowSpec, WorkflowStatus};
use wfengine::Error;

use crate::fixtures::{diamond_spec, task_spec, workflow_spec};

fn mock_service(worker: Arc<MockWorker>, tick: Duration, profile_dir: &TempDir) -> WorkflowService {
    let profiles = profile_dir.path().to_path_buf();
    WorkflowService::with_factory(Box::new(move |workflow| {
        Ok(WorkflowManager::new(
            workflow,
            TaskManager::new(worker.clone(), RetryPolicy::immediate(3)),
            Arc::new(StaticResourceMonitor::new(vec![Resource::new("r1", 2)])),
        )
        .with_scheduler(Scheduler::with_seed(7))
        .with_tick_interval(tick)
        .with_profile_dir(Some(profiles.clone())))
    }))
}

fn status_lines(status: &str) -> HashSet<String> {
    status.lines().map(str::to_string).collect()
}

#[tokio::test]
async fn test_diamond_runs_to_completion() {
    let profiles = TempDir::new().unwrap();
    let worker = Arc::new(MockWorker::new());
    let service = mock_service(worker.clone(), Duration::from_millis(1), &profiles);

    let id = service.submit(diamond_spec()).await.unwrap();
    let id_str = id.to_string();
    assert_eq!(assert_ok!(service.start(&id_str).await), "Started");
    assert_eq!(service.wait(&id_str).await.unwrap(), WorkflowStatus::Completed);

    let status = service.status(&id_str).await.unwrap();
    assert!(status.starts_with("root: COMPLETED"));
    assert!(status.ends_with("join: COMPLETED"));
    let expected: HashSet<String> = ["root", "left", "right", "join"]
        .iter()
        .map(|n| format!("{}: COMPLETED", n))
        .collect();
    assert_eq!(status_lines(&status), expected);

    let mut submitted = worker.submitted_tasks().await;
    submitted.sort();
    assert_eq!(submitted, vec!["join", "left", "right", "root"]);

    let path = profiles.path().join(format!("{}.json", id));
    assert!(path.exists());
    let profile = Profiler::load(&path).unwrap();
    assert_eq!(profile.schedules.len(), 3);
    assert!(profile.state_changes.len() >= 8);
}

#[tokio::test]
async fn test_failed_task_fails_workflow() {
    let profiles = TempDir::new().unwrap();
    let worker = Arc::new(MockWorker::new().with_failing_task("left"));
    let service = mock_service(worker, Duration::from_millis(1), &profiles);

    let id = service.submit(diamond_spec()).await.unwrap().to_string();
    assert_ok!(service.start(&id).await);
    assert_eq!(service.wait(&id).await.unwrap(), WorkflowStatus::Failed);

    let lines = status_lines(&service.status(&id).await.unwrap());
    assert!(lines.contains("root: COMPLETED"));
    assert!(lines.contains("left: FAILED"));
    assert!(lines.contains("right: COMPLETED"));
    assert!(lines.contains("join: CANCELLED"));
}

/// With a long tick the driver does one pass and then sleeps, leaving room
/// for control requests.
#[tokio::test]
async fn test_pause_resume_and_cancel_through_service() {
    let profiles = TempDir::new().unwrap();
    let worker = Arc::new(MockWorker::new());
    let service = mock_service(worker.clone(), Duration::from_secs(3600), &profiles);

    let id = service.submit(diamond_spec()).await.unwrap().to_string();
    assert_ok!(service.start(&id).await);
    // A second start does not spawn another driver
    assert_ok!(service.start(&id).await);

    assert_eq!(service.patch(&id, PatchOption::Pause).await.unwrap(), "PAUSED");
    assert_err!(service.patch(&id, PatchOption::Pause).await);
    assert_eq!(service.patch(&id, PatchOption::Resume).await.unwrap(), "RUNNING");

    assert_eq!(service.cancel(&id).await.unwrap(), "cancelled");
    assert_eq!(service.wait(&id).await.unwrap(), WorkflowStatus::Cancelled);

    let lines = status_lines(&service.status(&id).await.unwrap());
    for name in ["left", "right", "join"] {
        assert!(lines.contains(&format!("{}: CANCELLED", name)), "{:?}", lines);
    }
    assert!(!worker.submitted_tasks().await.contains(&"join".to_string()));
}

#[tokio::test]
async fn test_invalid_graph_is_rejected_at_submit() {
    let profiles = TempDir::new().unwrap();
    let service = mock_service(Arc::new(MockWorker::new()), Duration::from_millis(1), &profiles);

    let cyclic = workflow_spec("cycle", &[("a", &["b"]), ("b", &["a"])]);
    assert!(matches!(service.submit(cyclic).await, Err(Error::Validation(_))));

    let dangling = workflow_spec("dangling", &[("a", &["missing"])]);
    assert_err!(service.submit(dangling).await);
    assert!(service.workflow_ids().await.is_empty());
}

#[tokio::test]
async fn test_workflows_run_independently() {
    let profiles = TempDir::new().unwrap();
    let service = mock_service(Arc::new(MockWorker::new()), Duration::from_millis(1), &profiles);

    let first = service.submit(diamond_spec()).await.unwrap().to_string();
    let second = service
        .submit(workflow_spec("pair", &[("x", &[]), ("y", &["x"])]))
        .await
        .unwrap()
        .to_string();
    assert_eq!(service.workflow_ids().await.len(), 2);

    assert_ok!(service.start(&first).await);
    assert_ok!(service.start(&second).await);
    assert_eq!(service.wait(&first).await.unwrap(), WorkflowStatus::Completed);
    assert_eq!(service.wait(&second).await.unwrap(), WorkflowStatus::Completed);
    assert_eq!(
        service.status(&second).await.unwrap(),
        "x: COMPLETED\ny: COMPLETED"
    );
}

fn config_for(backend: WorkerBackend, profiles: &TempDir) -> Config {
    let mut config = Config::default();
    config.worker.backend = backend;
    config.engine.tick_interval_ms = 1;
    config.engine.profile_dir = Some(profiles.path().to_string_lossy().into_owned());
    config.retry = RetryPolicy::immediate(3);
    config
}

#[tokio::test]
async fn test_config_driven_service_with_mock_backend() {
    let profiles = TempDir::new().unwrap();
    let service = WorkflowService::new(config_for(WorkerBackend::Mock, &profiles));

    let id = service.submit(diamond_spec()).await.unwrap();
    assert_ok!(service.start(&id.to_string()).await);
    assert_eq!(
        service.wait(&id.to_string()).await.unwrap(),
        WorkflowStatus::Completed
    );
    assert!(profiles.path().join(format!("{}.json", id)).exists());
}

fn shell_spec(tasks: &[(&str, &str, &[&str])]) -> WorkflowSpec {
    WorkflowSpec {
        name: "shell".to_string(),
        tasks: tasks
            .iter()
            .map(|(name, command, deps)| {
                let mut spec = task_spec(name, deps);
                spec.command = command.to_string();
                spec
            })
            .collect(),
        outputs: Vec::new(),
    }
}

#[tokio::test]
async fn test_local_worker_runs_shell_tasks() {
    let profiles = TempDir::new().unwrap();
    let service = WorkflowService::new(config_for(WorkerBackend::Local, &profiles));

    let ok = service
        .submit(shell_spec(&[("first", "true", &[]), ("second", "echo done", &["first"])]))
        .await
        .unwrap()
        .to_string();
    assert_ok!(service.start(&ok).await);
    let status = tokio::time::timeout(Duration::from_secs(30), service.wait(&ok))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, WorkflowStatus::Completed);

    let failing = service
        .submit(shell_spec(&[("broken", "exit 3", &[]), ("after", "true", &["broken"])]))
        .await
        .unwrap()
        .to_string();
    assert_ok!(service.start(&failing).await);
    let status = tokio::time::timeout(Duration::from_secs(30), service.wait(&failing))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, WorkflowStatus::Failed);
    assert_eq!(
        service.status(&failing).await.unwrap(),
        "broken: FAILED\nafter: CANCELLED"
    );
}
