//! Adapters to external workload managers.
//!
//! Every backend implements the [`Worker`] capability set: submit a job
//! script, cancel a job, query a job. Backends translate their own status
//! vocabulary into [`JobState`]. The active backend is picked from
//! configuration once, at construction.

pub(crate) mod command;
mod local;
mod mock;
mod pbs;
mod script;
mod slurm;

pub use local::LocalWorker;
pub use mock::MockWorker;
pub use pbs::PbsWorker;
pub use script::{JobScript, ScriptDialect};
pub use slurm::SlurmWorker;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{WorkerBackend, WorkerConfig};
use crate::core::job::{JobId, JobState};
use crate::error::Result;

/// Capability interface over a workload manager.
///
/// `submit_job` is not idempotent: calling it twice creates two jobs, so
/// callers must confirm no live job exists before resubmitting.
/// `query_job` and `cancel_job` must return within the backend's own
/// timeout, reporting `Error::WorkerUnavailable` instead of hanging.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Directive flavour used when rendering job scripts.
    fn dialect(&self) -> ScriptDialect;

    /// Submit a script, returning the assigned job id and initial state.
    async fn submit_job(&self, script: &JobScript) -> Result<(JobId, JobState)>;

    /// Ask the workload manager to cancel a job.
    async fn cancel_job(&self, job_id: &JobId) -> Result<JobState>;

    /// Current state of a job.
    async fn query_job(&self, job_id: &JobId) -> Result<JobState>;

    /// Look for a live job carrying `job_name`.
    ///
    /// Used after an ambiguous submission failure to avoid creating a
    /// duplicate job. Backends that cannot search by name return `None`.
    async fn find_live_job(&self, _job_name: &str) -> Result<Option<(JobId, JobState)>> {
        Ok(None)
    }
}

/// Build the worker selected by `config.backend`.
pub fn from_config(config: &WorkerConfig) -> Arc<dyn Worker> {
    match config.backend {
        WorkerBackend::Slurm => Arc::new(SlurmWorker::new(config)),
        WorkerBackend::Pbs => Arc::new(PbsWorker::new(config)),
        WorkerBackend::Local => Arc::new(LocalWorker::new()),
        WorkerBackend::Mock => Arc::new(MockWorker::new()),
    }
}

/// Whether the command-line tools for `backend` are on `PATH`.
pub fn backend_available(backend: WorkerBackend) -> bool {
    let tools: &[&str] = match backend {
        WorkerBackend::Slurm => &["sbatch", "squeue", "scancel"],
        WorkerBackend::Pbs => &["qsub", "qstat", "qdel"],
        WorkerBackend::Local => &["sh"],
        WorkerBackend::Mock => &[],
    };
    tools.iter().all(|tool| which::which(tool).is_ok())
}
