//! Runs job scripts as child processes of the engine.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::{JobScript, ScriptDialect, Worker};
use crate::core::job::{JobId, JobState};
use crate::{wlog_debug, Error, Result};

struct LocalJob {
    name: String,
    child: Child,
    /// Final state once the process has been reaped.
    finished: Option<JobState>,
}

/// Worker backed by `sh` on the local machine.
///
/// Job ids are sequential and only meaningful to this instance.
pub struct LocalWorker {
    next_id: AtomicU64,
    jobs: Mutex<HashMap<JobId, LocalJob>>,
}

impl LocalWorker {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn refresh(job: &mut LocalJob) -> Result<JobState> {
        if let Some(state) = job.finished {
            return Ok(state);
        }
        match job.child.try_wait()? {
            Some(status) => {
                let state = if status.success() {
                    JobState::Completed
                } else {
                    JobState::Failed
                };
                job.finished = Some(state);
                Ok(state)
            }
            None => Ok(JobState::Running),
        }
    }
}

impl Default for LocalWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for LocalWorker {
    fn name(&self) -> &'static str {
        "local"
    }

    fn dialect(&self) -> ScriptDialect {
        ScriptDialect::Shell
    }

    async fn submit_job(&self, script: &JobScript) -> Result<(JobId, JobState)> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(&script.body)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::WorkerUnavailable(format!("sh: {}", e)))?;

        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst).to_string());
        wlog_debug!("local job {} started for {}", id, script.job_name);
        self.jobs.lock().await.insert(
            id.clone(),
            LocalJob {
                name: script.job_name.clone(),
                child,
                finished: None,
            },
        );
        Ok((id, JobState::Running))
    }

    async fn cancel_job(&self, job_id: &JobId) -> Result<JobState> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::Worker(format!("unknown local job {}", job_id)))?;
        if job.finished.is_none() && Self::refresh(job)? == JobState::Running {
            job.child.start_kill()?;
            job.finished = Some(JobState::Cancelled);
        }
        Self::refresh(job)
    }

    async fn query_job(&self, job_id: &JobId) -> Result<JobState> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::Worker(format!("unknown local job {}", job_id)))?;
        Self::refresh(job)
    }

    async fn find_live_job(&self, job_name: &str) -> Result<Option<(JobId, JobState)>> {
        let mut jobs = self.jobs.lock().await;
        for (id, job) in jobs.iter_mut() {
            if job.name == job_name {
                let state = Self::refresh(job)?;
                if !state.is_terminal() {
                    return Ok(Some((id.clone(), state)));
                }
            }
        }
        Ok(None)
    }
}
