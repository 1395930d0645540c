//! Task execution coordinator.
//!
//! Submits tasks through a [`Worker`], polls their jobs and cancels them.
//! Each task has a slot guarded by its own mutex, so at most one job per
//! task is ever live while independent tasks proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::core::job::{Job, JobId, JobState};
use crate::core::resource::{Allocation, Resource};
use crate::core::task::{Task, TaskId, TaskState};
use crate::error::{Error, Result};
use crate::orchestration::RetryPolicy;
use crate::worker::{JobScript, Worker};
use crate::{wlog_debug, wlog_error, wlog_warn};

/// Coordinator-side state of one task's submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionState {
    Unsubmitted,
    Submitting,
    JobPending,
    JobRunning,
    JobCompleted,
    JobFailed,
    JobCancelled,
}

impl From<JobState> for SubmissionState {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Pending | JobState::Unknown => SubmissionState::JobPending,
            JobState::Running => SubmissionState::JobRunning,
            JobState::Completed => SubmissionState::JobCompleted,
            JobState::Failed => SubmissionState::JobFailed,
            JobState::Cancelled => SubmissionState::JobCancelled,
        }
    }
}

/// Task state implied by an observed job state.
pub fn task_state_for(job_state: JobState) -> TaskState {
    match job_state {
        JobState::Pending | JobState::Running | JobState::Unknown => TaskState::Running,
        JobState::Completed => TaskState::Completed,
        JobState::Failed => TaskState::Failed,
        JobState::Cancelled => TaskState::Cancelled,
    }
}

/// A change observed by `poll`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskUpdate {
    pub task_id: TaskId,
    pub task_name: String,
    pub job_state: JobState,
    /// State the task should move to.
    pub state: TaskState,
    /// Why the task failed when the job itself did not report it.
    pub reason: Option<String>,
}

/// What `cancel` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The worker was asked to cancel this live job.
    JobCancelRequested(JobId),
    /// No live job existed; the task can be cancelled directly.
    NoJob,
}

struct TaskSlot {
    task_name: String,
    state: SubmissionState,
    job: Option<Job>,
    query_failures: u32,
    next_query_at: Option<Instant>,
    cancel_sent: bool,
}

impl TaskSlot {
    fn new(task_name: &str) -> Self {
        Self {
            task_name: task_name.to_string(),
            state: SubmissionState::Unsubmitted,
            job: None,
            query_failures: 0,
            next_query_at: None,
            cancel_sent: false,
        }
    }

    fn live_job(&self) -> Option<&Job> {
        self.job.as_ref().filter(|job| job.is_live())
    }

    fn record_job(&mut self, task_id: TaskId, job_id: JobId, state: JobState) -> Job {
        let job = Job::new(job_id, task_id, state);
        self.state = state.into();
        self.cancel_sent = false;
        self.job = Some(job.clone());
        job
    }
}

pub struct TaskManager {
    worker: Arc<dyn Worker>,
    retry: RetryPolicy,
    account: Option<String>,
    slots: RwLock<HashMap<TaskId, Arc<Mutex<TaskSlot>>>>,
}

impl TaskManager {
    pub fn new(worker: Arc<dyn Worker>, retry: RetryPolicy) -> Self {
        Self {
            worker,
            retry,
            account: None,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Accounting project rendered into every job script.
    pub fn with_account(mut self, account: Option<String>) -> Self {
        self.account = account;
        self
    }

    pub fn worker(&self) -> &Arc<dyn Worker> {
        &self.worker
    }

    async fn slot(&self, task: &Task) -> Arc<Mutex<TaskSlot>> {
        if let Some(slot) = self.slots.read().await.get(&task.id) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(task.id)
            .or_insert_with(|| Arc::new(Mutex::new(TaskSlot::new(&task.name))))
            .clone()
    }

    /// Submit `task` as placed by `allocation`.
    ///
    /// Transient worker failures are retried with backoff. Before every
    /// retry the worker is asked for a live job under the task's job name,
    /// and such a job is adopted instead of submitting again.
    ///
    /// # Errors
    /// - `Error::JobAlreadyLive` if the task already has a live job
    /// - `Error::SubmissionExhausted` once the attempt ceiling is reached
    /// - the worker's error for non-transient rejections
    pub async fn submit(
        &self,
        task: &Task,
        allocation: &Allocation,
        resource: Option<&Resource>,
    ) -> Result<Job> {
        let slot = self.slot(task).await;
        let mut slot = slot.lock().await;
        if slot.live_job().is_some() {
            return Err(Error::JobAlreadyLive {
                task: task.name.clone(),
            });
        }
        slot.state = SubmissionState::Submitting;

        let script = JobScript::render(
            self.worker.dialect(),
            task,
            allocation,
            resource,
            self.account.as_deref(),
        );

        let mut attempts = 0;
        loop {
            if attempts > 0 {
                tokio::time::sleep(self.retry.delay(attempts - 1)).await;
                match self.worker.find_live_job(&script.job_name).await {
                    Ok(Some((job_id, state))) => {
                        wlog_warn!(
                            "adopting live job {} for {} after failed submission",
                            job_id,
                            task.name
                        );
                        return Ok(slot.record_job(task.id, job_id, state));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // Cannot tell whether a job exists, so do not submit blindly
                        attempts += 1;
                        wlog_warn!("live-job lookup for {} failed: {}", task.name, e);
                        if !e.is_transient() || !self.retry.allows_another(attempts) {
                            slot.state = SubmissionState::JobFailed;
                            return Err(self.give_up(task, attempts, e));
                        }
                        continue;
                    }
                }
            }

            attempts += 1;
            match self.worker.submit_job(&script).await {
                Ok((job_id, state)) => {
                    wlog_debug!(
                        "submitted {} as job {} ({}) after {} attempt(s)",
                        task.name,
                        job_id,
                        state,
                        attempts
                    );
                    return Ok(slot.record_job(task.id, job_id, state));
                }
                Err(e) if e.is_transient() && self.retry.allows_another(attempts) => {
                    wlog_warn!(
                        "submit of {} failed (attempt {}/{}): {}",
                        task.name,
                        attempts,
                        self.retry.max_attempts,
                        e
                    );
                }
                Err(e) => {
                    slot.state = SubmissionState::JobFailed;
                    return Err(self.give_up(task, attempts, e));
                }
            }
        }
    }

    fn give_up(&self, task: &Task, attempts: u32, last: Error) -> Error {
        if last.is_transient() {
            wlog_error!(
                "submit of {} exhausted after {} attempts: {}",
                task.name,
                attempts,
                last
            );
            Error::SubmissionExhausted {
                task: task.name.clone(),
                attempts,
            }
        } else {
            wlog_error!("submit of {} rejected: {}", task.name, last);
            last
        }
    }

    /// Query every outstanding job and report the ones whose state changed.
    pub async fn poll(&self) -> Vec<TaskUpdate> {
        let slots: Vec<(TaskId, Arc<Mutex<TaskSlot>>)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();

        join_all(slots.iter().map(|(id, slot)| self.poll_one(*id, slot)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn poll_one(&self, task_id: TaskId, slot: &Mutex<TaskSlot>) -> Option<TaskUpdate> {
        let mut guard = slot.lock().await;
        let slot = &mut *guard;
        let job_id = slot.live_job()?.id.clone();
        if slot.next_query_at.is_some_and(|at| Instant::now() < at) {
            return None;
        }

        match self.worker.query_job(&job_id).await {
            Ok(state) => {
                slot.query_failures = 0;
                slot.next_query_at = None;
                let job = slot.job.as_mut()?;
                if job.state == state {
                    return None;
                }
                if state == JobState::Unknown {
                    wlog_warn!("job {} of {} reported an unknown state", job_id, slot.task_name);
                }
                job.state = state;
                slot.state = state.into();
                Some(TaskUpdate {
                    task_id,
                    task_name: slot.task_name.clone(),
                    job_state: state,
                    state: task_state_for(state),
                    reason: None,
                })
            }
            Err(e) if e.is_transient() => {
                slot.query_failures += 1;
                if self.retry.allows_another(slot.query_failures) {
                    let delay = self.retry.delay(slot.query_failures - 1);
                    wlog_warn!(
                        "query of job {} failed ({}), next try in {:?}",
                        job_id,
                        e,
                        delay
                    );
                    slot.next_query_at = Some(Instant::now() + delay);
                    return None;
                }
                let reason = format!(
                    "job {} unreachable after {} queries: {}",
                    job_id, slot.query_failures, e
                );
                // The job may still exist; try to stop it before forgetting it
                if let Err(cancel_err) = self.worker.cancel_job(&job_id).await {
                    wlog_warn!("could not cancel orphaned job {}: {}", job_id, cancel_err);
                }
                Some(Self::fail_slot(slot, task_id, reason))
            }
            Err(e) => {
                let reason = format!("job {} query rejected: {}", job_id, e);
                Some(Self::fail_slot(slot, task_id, reason))
            }
        }
    }

    fn fail_slot(slot: &mut TaskSlot, task_id: TaskId, reason: String) -> TaskUpdate {
        wlog_error!("{}: {}", slot.task_name, reason);
        if let Some(job) = slot.job.as_mut() {
            job.state = JobState::Failed;
        }
        slot.state = SubmissionState::JobFailed;
        TaskUpdate {
            task_id,
            task_name: slot.task_name.clone(),
            job_state: JobState::Failed,
            state: TaskState::Failed,
            reason: Some(reason),
        }
    }

    /// Cancel the live job of `task_id`, if it has one.
    ///
    /// Transient worker failures are retried with the submission backoff.
    /// Teardown is asynchronous: the job's final state arrives through a
    /// later `poll`.
    ///
    /// # Errors
    /// The last worker error once retries are exhausted or on a rejection;
    /// the job then counts as uncancelled for [`TaskManager::uncancelled_jobs`].
    pub async fn cancel(&self, task_id: &TaskId) -> Result<CancelOutcome> {
        let Some(slot) = self.slots.read().await.get(task_id).cloned() else {
            return Ok(CancelOutcome::NoJob);
        };
        let mut slot = slot.lock().await;
        let Some(job_id) = slot.live_job().map(|job| job.id.clone()) else {
            if slot.job.is_none() {
                slot.state = SubmissionState::JobCancelled;
            }
            return Ok(CancelOutcome::NoJob);
        };

        let mut attempts = 0;
        let state = loop {
            attempts += 1;
            match self.worker.cancel_job(&job_id).await {
                Ok(state) => break state,
                Err(e) if e.is_transient() && self.retry.allows_another(attempts) => {
                    wlog_warn!(
                        "cancel of job {} failed (attempt {}/{}): {}",
                        job_id,
                        attempts,
                        self.retry.max_attempts,
                        e
                    );
                    tokio::time::sleep(self.retry.delay(attempts - 1)).await;
                }
                Err(e) => {
                    wlog_error!("cancel of job {} gave up after {} attempts: {}", job_id, attempts, e);
                    return Err(e);
                }
            }
        };

        wlog_debug!("cancel of job {} for {} -> {}", job_id, slot.task_name, state);
        slot.cancel_sent = true;
        if state.is_terminal() {
            if let Some(job) = slot.job.as_mut() {
                job.state = state;
            }
            slot.state = state.into();
        }
        Ok(CancelOutcome::JobCancelRequested(job_id))
    }

    /// Tasks whose live job has not acknowledged a cancel request yet.
    pub async fn uncancelled_jobs(&self) -> Vec<TaskId> {
        let slots: Vec<(TaskId, Arc<Mutex<TaskSlot>>)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();
        let mut pending = Vec::new();
        for (id, slot) in slots {
            let slot = slot.lock().await;
            if slot.live_job().is_some() && !slot.cancel_sent {
                pending.push(id);
            }
        }
        pending
    }

    /// Coordinator state of `task_id`; `Unsubmitted` if never seen.
    pub async fn state(&self, task_id: &TaskId) -> SubmissionState {
        match self.slots.read().await.get(task_id) {
            Some(slot) => slot.lock().await.state,
            None => SubmissionState::Unsubmitted,
        }
    }

    /// Last known job of `task_id`.
    pub async fn job(&self, task_id: &TaskId) -> Option<Job> {
        let slot = self.slots.read().await.get(task_id).cloned()?;
        let slot = slot.lock().await;
        slot.job.clone()
    }

    /// Number of jobs not yet observed in a terminal state.
    pub async fn live_jobs(&self) -> usize {
        let slots: Vec<Arc<Mutex<TaskSlot>>> = self.slots.read().await.values().cloned().collect();
        let mut live = 0;
        for slot in slots {
            if slot.lock().await.live_job().is_some() {
                live += 1;
            }
        }
        live
    }
}
