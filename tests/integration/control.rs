//! Cancellation, failure cascades and pause/resume.

use wfengine::core::resource::Resource;
use wfengine::core::task::TaskState;
use wfengine::orchestration::{CancelOutcome, SubmissionState};
use wfengine::profiler::Profiler;
use wfengine::worker::MockWorker;
use wfengine::workflow::WorkflowStatus;

use crate::fixtures::{diamond_spec, workflow_spec, Harness};

/// Cancel with one RUNNING task and one PENDING dependent: the running
/// task's job gets a cancel request, the dependent is cancelled without
/// ever being submitted.
#[tokio::test]
async fn test_cancel_running_workflow() {
    let mut harness = Harness::new(
        workflow_spec("cancel", &[("running", &[]), ("dependent", &["running"])]),
        MockWorker::new(),
        vec![Resource::new("r1", 1)],
    );
    harness.manager.start().unwrap();
    harness.tick().await;
    assert_eq!(harness.state("running"), TaskState::Running);
    assert_eq!(harness.state("dependent"), TaskState::Pending);

    let running_id = harness.task_id("running");
    let job = harness.manager.task_manager().job(&running_id).await.unwrap();

    let cancelled = harness.manager.cancel().await.unwrap();
    assert_eq!(cancelled.len(), 2);
    assert_eq!(harness.status(), WorkflowStatus::Cancelled);
    assert_eq!(harness.state("running"), TaskState::Cancelled);
    assert_eq!(harness.state("dependent"), TaskState::Cancelled);
    assert_eq!(harness.worker.cancellations().await, vec![job.id]);

    // Later ticks neither resubmit nor resurrect anything
    for _ in 0..3 {
        let report = harness.tick().await;
        assert_eq!(report.status, WorkflowStatus::Cancelled);
        assert!(report.submitted.is_empty());
    }
    assert_eq!(harness.worker.submitted_tasks().await, vec!["running".to_string()]);
    assert_eq!(
        harness.manager.task_manager().cancel(&harness.task_id("dependent")).await.unwrap(),
        CancelOutcome::NoJob
    );

    let profile_path = harness.manager.profile_path().unwrap().clone();
    assert!(profile_path.starts_with(harness.profile_dir.path()));
    let profile = Profiler::load(&profile_path).unwrap();
    assert!(profile
        .state_changes
        .iter()
        .any(|r| r.task_name == "dependent" && r.next_state == TaskState::Cancelled));
}

/// A cancel request the workload manager keeps refusing is reissued by
/// later ticks instead of leaving the job running unowned.
#[tokio::test]
async fn test_failed_job_cancel_is_reissued() {
    let mut harness = Harness::new(
        workflow_spec("stubborn", &[("running", &[])]),
        MockWorker::new().with_cancel_failures(3),
        vec![Resource::new("r1", 1)],
    );
    harness.manager.start().unwrap();
    harness.tick().await;
    let job = harness
        .manager
        .task_manager()
        .job(&harness.task_id("running"))
        .await
        .unwrap();

    harness.manager.cancel().await.unwrap();
    assert_eq!(harness.status(), WorkflowStatus::Cancelled);
    assert_eq!(harness.state("running"), TaskState::Cancelled);
    assert!(harness.worker.cancellations().await.is_empty());
    assert!(!harness.manager.cancel_settled().await);

    let report = harness.tick().await;
    assert_eq!(report.status, WorkflowStatus::Cancelled);
    assert_eq!(harness.worker.cancellations().await, vec![job.id]);
    assert!(harness.manager.cancel_settled().await);
    assert_eq!(harness.manager.task_manager().live_jobs().await, 0);

    harness.tick().await;
    assert_eq!(harness.worker.cancellations().await.len(), 1);
    assert_eq!(harness.worker.submit_attempts().await, 1);
}

#[tokio::test]
async fn test_cancel_after_completion_is_rejected() {
    let mut harness = Harness::new(
        workflow_spec("done", &[("only", &[])]),
        MockWorker::new(),
        vec![Resource::new("r1", 1)],
    );
    harness.manager.start().unwrap();
    harness.run_to_end(10).await;
    assert_eq!(harness.status(), WorkflowStatus::Completed);
    assert!(harness.manager.cancel().await.is_err());
}

/// Failure of `root` cancels every PENDING descendant, none of which is
/// ever submitted; unrelated tasks still finish.
#[tokio::test]
async fn test_failure_cascade() {
    let mut spec = diamond_spec();
    spec.tasks.push(crate::fixtures::task_spec("bystander", &[]));
    let mut harness = Harness::new(
        spec,
        MockWorker::new().with_failing_task("root"),
        vec![Resource::new("r1", 4)],
    );
    harness.manager.start().unwrap();

    let reports = harness.run_to_end(10).await;
    assert_eq!(harness.status(), WorkflowStatus::Failed);
    assert_eq!(harness.state("root"), TaskState::Failed);
    for name in ["left", "right", "join"] {
        assert_eq!(harness.state(name), TaskState::Cancelled, "{}", name);
        assert_eq!(
            harness.manager.task_manager().state(&harness.task_id(name)).await,
            SubmissionState::Unsubmitted
        );
    }
    assert_eq!(harness.state("bystander"), TaskState::Completed);

    let cascaded: usize = reports.iter().map(|r| r.cascaded.len()).sum();
    assert_eq!(cascaded, 3);
    let mut submitted = harness.worker.submitted_tasks().await;
    submitted.sort();
    assert_eq!(submitted, vec!["bystander".to_string(), "root".to_string()]);
}

/// After pause no submission happens, while the running job is still
/// polled to completion; resume picks the ready work back up.
#[tokio::test]
async fn test_pause_stops_submissions_until_resume() {
    let mut harness = Harness::new(
        workflow_spec("pause", &[("first", &[]), ("second", &["first"])]),
        MockWorker::new(),
        vec![Resource::new("r1", 1)],
    );
    harness.manager.start().unwrap();
    harness.tick().await;
    assert_eq!(harness.state("first"), TaskState::Running);

    harness.manager.pause().unwrap();
    assert_eq!(harness.state("first"), TaskState::Paused);

    for _ in 0..4 {
        let report = harness.tick().await;
        assert!(report.submitted.is_empty());
        assert_eq!(report.status, WorkflowStatus::Paused);
    }
    assert_eq!(harness.state("first"), TaskState::Completed);
    assert_eq!(harness.state("second"), TaskState::Pending);
    assert_eq!(harness.worker.submit_attempts().await, 1);

    harness.manager.resume().unwrap();
    assert_eq!(harness.status(), WorkflowStatus::Running);
    let report = harness.tick().await;
    assert_eq!(report.submitted, vec![harness.task_id("second")]);

    harness.run_to_end(10).await;
    assert_eq!(harness.status(), WorkflowStatus::Completed);
}

#[tokio::test]
async fn test_pause_with_all_work_finished_completes() {
    let mut harness = Harness::new(
        workflow_spec("short", &[("only", &[])]),
        MockWorker::new(),
        vec![Resource::new("r1", 1)],
    );
    harness.manager.start().unwrap();
    harness.tick().await;
    harness.manager.pause().unwrap();

    harness.run_to_end(5).await;
    assert_eq!(harness.status(), WorkflowStatus::Completed);
}

#[tokio::test]
async fn test_cancel_while_paused() {
    let mut harness = Harness::new(
        workflow_spec("paused", &[("a", &[]), ("b", &["a"])]),
        MockWorker::new(),
        vec![Resource::new("r1", 1)],
    );
    harness.manager.start().unwrap();
    harness.tick().await;
    harness.manager.pause().unwrap();

    harness.manager.cancel().await.unwrap();
    assert_eq!(harness.status(), WorkflowStatus::Cancelled);
    assert_eq!(harness.state("a"), TaskState::Cancelled);
    assert_eq!(harness.state("b"), TaskState::Cancelled);
    assert!(harness.manager.resume().is_err());
}
