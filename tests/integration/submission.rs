//! Submission retries, the attempt ceiling and duplicate-job protection.

use wfengine::core::resource::Resource;
use wfengine::core::task::TaskState;
use wfengine::orchestration::{RetryPolicy, SubmissionState};
use wfengine::worker::MockWorker;
use wfengine::workflow::WorkflowStatus;

use crate::fixtures::{workflow_spec, Harness};

fn single_task(worker: MockWorker, max_attempts: u32) -> Harness {
    Harness::with_retry(
        workflow_spec("single", &[("job", &[])]),
        worker,
        vec![Resource::new("r1", 1)],
        RetryPolicy::immediate(max_attempts),
    )
}

/// Two transient failures then success, with a ceiling of three.
#[tokio::test]
async fn test_third_attempt_succeeds_under_ceiling_three() {
    let mut harness = single_task(MockWorker::new().with_submit_failures(2), 3);
    harness.manager.start().unwrap();

    let report = harness.tick().await;
    assert_eq!(report.submitted, vec![harness.task_id("job")]);
    assert!(report.failed_submissions.is_empty());
    assert_eq!(harness.state("job"), TaskState::Running);
    assert_eq!(harness.worker.submit_attempts().await, 3);
    assert_eq!(harness.worker.job_count().await, 1);
}

/// The same failures with a ceiling of two exhaust the task.
#[tokio::test]
async fn test_ceiling_two_fails_task_with_submission_exhausted() {
    let mut harness = single_task(MockWorker::new().with_submit_failures(2), 2);
    harness.manager.start().unwrap();
    let id = harness.task_id("job");

    let report = harness.tick().await;
    assert_eq!(report.failed_submissions.len(), 1);
    assert!(report.failed_submissions[0].1.contains("exhausted after 2 attempts"));
    assert_eq!(harness.state("job"), TaskState::Failed);
    assert_eq!(report.status, WorkflowStatus::Failed);
    assert_eq!(
        harness.manager.task_manager().state(&id).await,
        SubmissionState::JobFailed
    );
    assert!(harness.manager.failure_reason(&id).is_some());
    assert_eq!(harness.worker.job_count().await, 0);
}

/// A submission whose response was lost is found and adopted, not repeated.
#[tokio::test]
async fn test_lost_response_never_creates_second_job() {
    let mut harness = single_task(MockWorker::new().with_lost_responses(1), 3);
    harness.manager.start().unwrap();

    harness.run_to_end(10).await;
    assert_eq!(harness.status(), WorkflowStatus::Completed);
    assert_eq!(harness.worker.submit_attempts().await, 1);
    assert_eq!(harness.worker.job_count().await, 1);
}

#[tokio::test]
async fn test_rejected_submission_is_not_retried() {
    let mut harness = single_task(MockWorker::new().with_rejected_task("job"), 5);
    harness.manager.start().unwrap();

    let report = harness.tick().await;
    assert_eq!(report.status, WorkflowStatus::Failed);
    assert_eq!(harness.worker.submit_attempts().await, 1);
}

#[tokio::test]
async fn test_transient_query_failures_are_absorbed() {
    let mut harness = single_task(MockWorker::new().with_query_failures(2), 3);
    harness.manager.start().unwrap();

    let mut reports = Vec::new();
    for _ in 0..50 {
        let report = harness.tick().await;
        let done = report.status.is_terminal();
        reports.push(report);
        if done {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    assert_eq!(harness.status(), WorkflowStatus::Completed);
    assert_eq!(harness.worker.submit_attempts().await, 1);
}

#[tokio::test]
async fn test_failed_job_is_not_resubmitted() {
    let mut harness = single_task(MockWorker::new().with_failing_task("job"), 3);
    harness.manager.start().unwrap();

    harness.run_to_end(10).await;
    assert_eq!(harness.status(), WorkflowStatus::Failed);
    assert_eq!(harness.state("job"), TaskState::Failed);
    assert_eq!(harness.worker.submit_attempts().await, 1);
}
