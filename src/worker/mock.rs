//! Deterministic in-memory worker.
//!
//! Every job starts PENDING and advances one step per query:
//! PENDING -> RUNNING -> COMPLETED (or FAILED for tasks marked to fail).
//! Builder hooks inject the failure modes the coordinator has to survive.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{JobScript, ScriptDialect, Worker};
use crate::core::job::{JobId, JobState};
use crate::{wlog_debug, Error, Result};

#[derive(Debug)]
struct MockJob {
    job_name: String,
    state: JobState,
    cancel_requested: bool,
    ends_failed: bool,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    jobs: HashMap<JobId, MockJob>,
    submissions: Vec<JobScript>,
    cancellations: Vec<JobId>,
    submit_attempts: u32,
    submit_failures: u32,
    lost_responses: u32,
    query_failures: u32,
    cancel_failures: u32,
}

#[derive(Default)]
pub struct MockWorker {
    failing_tasks: HashSet<String>,
    rejected_tasks: HashSet<String>,
    state: Mutex<MockState>,
}

impl MockWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` submissions fail transiently without creating a job.
    pub fn with_submit_failures(mut self, n: u32) -> Self {
        self.state.get_mut().submit_failures = n;
        self
    }

    /// The next `n` submissions create a job but the response is lost.
    pub fn with_lost_responses(mut self, n: u32) -> Self {
        self.state.get_mut().lost_responses = n;
        self
    }

    /// The next `n` status queries fail transiently.
    pub fn with_query_failures(mut self, n: u32) -> Self {
        self.state.get_mut().query_failures = n;
        self
    }

    /// The next `n` cancel requests fail transiently.
    pub fn with_cancel_failures(mut self, n: u32) -> Self {
        self.state.get_mut().cancel_failures = n;
        self
    }

    /// Jobs for `task_name` run and then end FAILED.
    pub fn with_failing_task(mut self, task_name: &str) -> Self {
        self.failing_tasks.insert(task_name.to_string());
        self
    }

    /// Submissions for `task_name` are rejected outright.
    pub fn with_rejected_task(mut self, task_name: &str) -> Self {
        self.rejected_tasks.insert(task_name.to_string());
        self
    }

    /// Every script that produced a job, in submission order.
    pub async fn submissions(&self) -> Vec<JobScript> {
        self.state.lock().await.submissions.clone()
    }

    /// Task names of every successful submission, in order.
    pub async fn submitted_tasks(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .submissions
            .iter()
            .map(|s| s.task_name.clone())
            .collect()
    }

    /// Every job id of an accepted `cancel_job`, in order.
    pub async fn cancellations(&self) -> Vec<JobId> {
        self.state.lock().await.cancellations.clone()
    }

    /// Number of `submit_job` calls, including failed ones.
    pub async fn submit_attempts(&self) -> u32 {
        self.state.lock().await.submit_attempts
    }

    /// Number of jobs that exist, live or finished.
    pub async fn job_count(&self) -> usize {
        self.state.lock().await.jobs.len()
    }
}

#[async_trait]
impl Worker for MockWorker {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn dialect(&self) -> ScriptDialect {
        ScriptDialect::Shell
    }

    async fn submit_job(&self, script: &JobScript) -> Result<(JobId, JobState)> {
        let mut state = self.state.lock().await;
        state.submit_attempts += 1;

        if self.rejected_tasks.contains(&script.task_name) {
            return Err(Error::Worker(format!(
                "submission of {} rejected",
                script.job_name
            )));
        }
        if state.submit_failures > 0 {
            state.submit_failures -= 1;
            return Err(Error::WorkerUnavailable(
                "mock controller unreachable".to_string(),
            ));
        }

        state.next_id += 1;
        let job_id = JobId(format!("mock-{}", state.next_id));
        state.jobs.insert(
            job_id.clone(),
            MockJob {
                job_name: script.job_name.clone(),
                state: JobState::Pending,
                cancel_requested: false,
                ends_failed: self.failing_tasks.contains(&script.task_name),
            },
        );
        state.submissions.push(script.clone());
        wlog_debug!("mock job {} for {}", job_id, script.job_name);

        if state.lost_responses > 0 {
            state.lost_responses -= 1;
            return Err(Error::WorkerUnavailable(
                "mock submission response lost".to_string(),
            ));
        }
        Ok((job_id, JobState::Pending))
    }

    async fn cancel_job(&self, job_id: &JobId) -> Result<JobState> {
        let mut state = self.state.lock().await;
        if state.cancel_failures > 0 {
            state.cancel_failures -= 1;
            return Err(Error::WorkerUnavailable("mock cancel timed out".to_string()));
        }
        state.cancellations.push(job_id.clone());
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::Worker(format!("unknown mock job {}", job_id)))?;
        if !job.state.is_terminal() {
            // Teardown lands on the next query
            job.cancel_requested = true;
        }
        Ok(job.state)
    }

    async fn query_job(&self, job_id: &JobId) -> Result<JobState> {
        let mut state = self.state.lock().await;
        if state.query_failures > 0 {
            state.query_failures -= 1;
            return Err(Error::WorkerUnavailable("mock query timed out".to_string()));
        }
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::Worker(format!("unknown mock job {}", job_id)))?;

        job.state = match job.state {
            s if s.is_terminal() => s,
            _ if job.cancel_requested => JobState::Cancelled,
            JobState::Pending => JobState::Running,
            _ if job.ends_failed => JobState::Failed,
            _ => JobState::Completed,
        };
        Ok(job.state)
    }

    async fn find_live_job(&self, job_name: &str) -> Result<Option<(JobId, JobState)>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .iter()
            .find(|(_, job)| job.job_name == job_name && !job.state.is_terminal())
            .map(|(id, job)| (id.clone(), job.state)))
    }
}
