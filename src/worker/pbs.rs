//! PBS/Torque adapter: `qsub`, `qstat` and `qdel`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::command::{self, CommandOutput};
use super::{JobScript, ScriptDialect, Worker};
use crate::config::WorkerConfig;
use crate::core::job::{JobId, JobState};
use crate::{wlog_debug, Error, Result};

pub struct PbsWorker {
    submit_timeout: Duration,
    query_timeout: Duration,
    cancel_timeout: Duration,
}

impl PbsWorker {
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
}

/// Parse the `key = value` attribute list printed by `qstat -f`.
fn parse_attributes(stdout: &str) -> HashMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(" = ")?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Map PBS `job_state` (plus `Exit_status` for finished jobs) to a JobState.
pub(crate) fn parse_state(job_state: &str, exit_status: Option<&str>) -> JobState {
    match job_state.trim() {
        "Q" | "H" | "W" | "T" | "S" | "U" => JobState::Pending,
        "R" | "E" | "B" => JobState::Running,
        "F" | "C" => match exit_status.map(str::trim) {
            Some("0") => JobState::Completed,
            // Negative exit codes come from the server killing the job
            Some(code) if code.starts_with('-') => JobState::Cancelled,
            Some(_) => JobState::Failed,
            None => JobState::Unknown,
        },
        _ => JobState::Unknown,
    }
}

fn parse_qstat(stdout: &str) -> JobState {
    let attributes = parse_attributes(stdout);
    match attributes.get("job_state") {
        Some(state) => parse_state(state, attributes.get("Exit_status").map(String::as_str)),
        None => JobState::Unknown,
    }
}

#[async_trait]
impl Worker for PbsWorker {
    fn name(&self) -> &'static str {
        "pbs"
    }

    fn dialect(&self) -> ScriptDialect {
        ScriptDialect::Pbs
    }

    async fn submit_job(&self, script: &JobScript) -> Result<(JobId, JobState)> {
        let output = Self::checked("qsub", &[], Some(&script.body), self.submit_timeout).await?;
        let id = output.stdout.trim();
        if id.is_empty() {
            return Err(Error::Worker("qsub returned no job id".to_string()));
        }
        wlog_debug!("qsub {} -> job {}", script.job_name, id);
        Ok((JobId::from(id), JobState::Pending))
    }

    async fn cancel_job(&self, job_id: &JobId) -> Result<JobState> {
        Self::checked("qdel", &[&job_id.0], None, self.cancel_timeout).await?;
        self.query_job(job_id).await
    }

    async fn query_job(&self, job_id: &JobId) -> Result<JobState> {
        // -x includes finished jobs still in the server history
        let output = Self::checked("qstat", &["-x", "-f", &job_id.0], None, self.query_timeout)
            .await?;
        Ok(parse_qstat(&output.stdout))
    }
}
