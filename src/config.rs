use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::resource::Resource;
use crate::log::LogSettings;
use crate::orchestration::RetryPolicy;
use crate::{wlog_debug, Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tick_interval_ms: u64,
    pub profile_dir: Option<String>,
    pub resource_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            profile_dir: None,
            resource_timeout_secs: 10,
        }
    }
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn resource_timeout(&self) -> Duration {
        Duration::from_secs(self.resource_timeout_secs)
    }

    /// Directory for profiling records; `~/.wfengine/profiles` when unset.
    pub fn profile_dir(&self) -> Result<PathBuf> {
        match &self.profile_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Config::wfengine_dir()?.join("profiles")),
        }
    }
}

/// Workload manager the engine submits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkerBackend {
    Slurm,
    Pbs,
    #[default]
    Local,
    Mock,
}

impl std::fmt::Display for WorkerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerBackend::Slurm => write!(f, "slurm"),
            WorkerBackend::Pbs => write!(f, "pbs"),
            WorkerBackend::Local => write!(f, "local"),
            WorkerBackend::Mock => write!(f, "mock"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub backend: WorkerBackend,
    pub submit_timeout_secs: u64,
    pub query_timeout_secs: u64,
    pub cancel_timeout_secs: u64,
    /// Accounting project passed to the batch system.
    pub account: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            backend: WorkerBackend::default(),
            submit_timeout_secs: 30,
            query_timeout_secs: 10,
            cancel_timeout_secs: 10,
            account: None,
        }
    }
}

impl WorkerConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_secs(self.cancel_timeout_secs)
    }
}

/// Where resource snapshots come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceSource {
    #[default]
    Static,
    Sinfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    pub source: ResourceSource,
    pub nodes: Vec<Resource>,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            source: ResourceSource::Static,
            nodes: vec![Resource::new("local", 1)],
        }
    }
}

impl Config {
    pub fn wfengine_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".wfengine"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::wfengine_dir()?.join("wfengine.toml"))
    }

    /// Load from the default location, falling back to defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        wlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            wlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        wlog_debug!(
            "Config loaded: backend={}, tick={}ms, max_attempts={}, resources={:?}",
            config.worker.backend,
            config.engine.tick_interval_ms,
            config.retry.max_attempts,
            config.resources.source
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        wlog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
