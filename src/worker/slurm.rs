//! Slurm adapter: `sbatch`, `squeue`/`sacct` and `scancel`.

use std::time::Duration;

use async_trait::async_trait;

use super::command::{self, CommandOutput};
use super::{JobScript, ScriptDialect, Worker};
use crate::config::WorkerConfig;
use crate::core::job::{JobId, JobState};
use crate::{wlog_debug, Error, Result};

pub struct SlurmWorker {
    submit_timeout: Duration,
    query_timeout: Duration,
    cancel_timeout: Duration,
}

impl SlurmWorker {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            submit_timeout: config.submit_timeout(),
            query_timeout: config.query_timeout(),
            cancel_timeout: config.cancel_timeout(),
        }
    }

    async fn checked(
        program: &str,
        args: &[&str],
        stdin: Option<&str>,
        limit: Duration,
    ) -> Result<CommandOutput> {
        let output = command::run(program, args, stdin, limit).await?;
        if !output.success {
            return Err(command::failure(program, &output));
        }
        Ok(output)
    }

    /// Ask `sacct` for a job that already left the queue.
    async fn accounting_state(&self, job_id: &JobId) -> Result<JobState> {
        let output = Self::checked(
            "sacct",
            &["-n", "-X", "-P", "-o", "State", "-j", &job_id.0],
            None,
            self.query_timeout,
        )
        .await?;
        Ok(output
            .stdout
            .lines()
            .find(|l| !l.trim().is_empty())
            .map(parse_state)
            .unwrap_or(JobState::Unknown))
    }
}

/// Map a Slurm state string (squeue `%T` or sacct `State`) to a JobState.
pub(crate) fn parse_state(raw: &str) -> JobState {
    // sacct prints e.g. "CANCELLED by 1000" or "FAILED+"
    let word = raw
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches('+')
        .to_ascii_uppercase();
    match word.as_str() {
        "PENDING" | "CONFIGURING" | "REQUEUED" | "REQUEUE_HOLD" | "REQUEUE_FED" | "RESV_DEL_HOLD"
        | "SUSPENDED" | "STOPPED" => JobState::Pending,
        "RUNNING" | "COMPLETING" | "SIGNALING" | "STAGE_OUT" | "RESIZING" => JobState::Running,
        "COMPLETED" => JobState::Completed,
        "CANCELLED" => JobState::Cancelled,
        "FAILED" | "TIMEOUT" | "NODE_FAIL" | "OUT_OF_MEMORY" | "BOOT_FAIL" | "DEADLINE"
        | "PREEMPTED" | "SPECIAL_EXIT" | "REVOKED" => JobState::Failed,
        _ => JobState::Unknown,
    }
}

/// Parse `sbatch --parsable` output: `jobid` or `jobid;cluster`.
pub(crate) fn parse_submission(stdout: &str) -> Result<JobId> {
    let id = stdout
        .trim()
        .split(';')
        .next()
        .unwrap_or("")
        .trim();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit() || c == '_') {
        return Err(Error::Worker(format!(
            "unexpected sbatch output: {:?}",
            stdout.trim()
        )));
    }
    Ok(JobId(id.to_string()))
}

#[async_trait]
impl Worker for SlurmWorker {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn dialect(&self) -> ScriptDialect {
        ScriptDialect::Slurm
    }

    async fn submit_job(&self, script: &JobScript) -> Result<(JobId, JobState)> {
        let output = Self::checked(
            "sbatch",
            &["--parsable"],
            Some(&script.body),
            self.submit_timeout,
        )
        .await?;
        let job_id = parse_submission(&output.stdout)?;
        wlog_debug!("sbatch {} -> job {}", script.job_name, job_id);
        Ok((job_id, JobState::Pending))
    }

    async fn cancel_job(&self, job_id: &JobId) -> Result<JobState> {
        Self::checked("scancel", &[&job_id.0], None, self.cancel_timeout).await?;
        // Teardown is asynchronous; report whatever the controller says now
        self.query_job(job_id).await
    }

    async fn query_job(&self, job_id: &JobId) -> Result<JobState> {
        let output = command::run(
            "squeue",
            &["-h", "-o", "%T", "-j", &job_id.0],
            None,
            self.query_timeout,
        )
        .await?;

        if output.success {
            if let Some(line) = output.stdout.lines().find(|l| !l.trim().is_empty()) {
                return Ok(parse_state(line));
            }
        } else if !output.stderr.contains("Invalid job id") {
            return Err(command::failure("squeue", &output));
        }

        // Finished jobs drop out of squeue
        self.accounting_state(job_id).await
    }

    async fn find_live_job(&self, job_name: &str) -> Result<Option<(JobId, JobState)>> {
        let output = Self::checked(
            "squeue",
            &["-h", "-o", "%i|%T", "-n", job_name],
            None,
            self.query_timeout,
        )
        .await?;
        Ok(output.stdout.lines().find_map(|line| {
            let (id, state) = line.trim().split_once('|')?;
            let state = parse_state(state);
            (!state.is_terminal()).then(|| (JobId(id.to_string()), state))
        }))
    }
}
