use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Invalid {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("Worker rejected request: {0}")]
    Worker(String),

    #[error("Submission of task {task} exhausted after {attempts} attempts")]
    SubmissionExhausted { task: String, attempts: u32 },

    #[error("Scheduling failed: {0}")]
    SchedulingFailure(String),

    #[error("Wrong workflow id: {0}")]
    WrongWorkflowId(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task {task} already has a live job")]
    JobAlreadyLive { task: String },
}

impl Error {
    /// Whether the failure is transient and the operation may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::WorkerUnavailable(_) | Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
