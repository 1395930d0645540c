//! Leveled file logging for the workflow engine.
//!
//! - ERROR: workflow-terminal failures and broken invariants
//! - WARN: degraded collaborators, retries, scheduling failures
//! - INFO: workflow lifecycle (submit, start, pause, resume, cancel, finish)
//! - DEBUG: task and job transitions, scheduling decisions
//! - TRACE: raw workload-manager command lines
//!
//! The threshold comes from the `[log]` config section, `--debug`, or
//! `WFENGINE_LOG=<level>`, in increasing precedence. Until [`init`] runs,
//! messages are dropped.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

static SINK: OnceLock<PathBuf> = OnceLock::new();
static THRESHOLD: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    #[default]
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    const ALL: [LogLevel; 5] = [
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = match s.trim().to_ascii_uppercase().as_str() {
            "WARNING" => "WARN".to_string(),
            other => other.to_string(),
        };
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == wanted)
            .ok_or_else(|| format!("unknown log level '{}'", s))
    }
}

/// `[log]` section of the config file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LogSettings {
    pub level: LogLevel,
    /// Log file; `~/.wfengine/wfengine.log` when unset.
    pub file: Option<PathBuf>,
}

/// Start logging per `settings`; `debug` raises the threshold to DEBUG.
///
/// The file is truncated. Only the first call picks the file.
pub fn init(settings: &LogSettings, debug: bool) {
    let mut level = settings.level;
    if debug {
        level = level.max(LogLevel::Debug);
    }
    if let Some(from_env) = std::env::var("WFENGINE_LOG").ok().and_then(|v| v.parse().ok()) {
        level = from_env;
    }
    set_level(level);

    let path = settings
        .file
        .clone()
        .or_else(|| dirs::home_dir().map(|home| home.join(".wfengine").join("wfengine.log")));
    if let Some(path) = path {
        init_at(path);
    }
}

/// Send output to `path` without touching the threshold.
pub fn init_at(path: PathBuf) {
    if SINK.get().is_some() {
        return;
    }
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(&path, "");
    let _ = SINK.set(path);
}

pub fn set_level(level: LogLevel) {
    THRESHOLD.store(level as u8, Ordering::SeqCst);
}

pub fn level() -> LogLevel {
    LogLevel::ALL[THRESHOLD.load(Ordering::Relaxed).min(4) as usize]
}

pub fn enabled(level: LogLevel) -> bool {
    level <= self::level() && SINK.get().is_some()
}

#[doc(hidden)]
pub fn write(level: LogLevel, args: fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    let Some(path) = SINK.get() else {
        return;
    };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let _ = writeln!(file, "{} {:<5} {}", now, level, args);
    }
}

/// Log at INFO.
#[macro_export]
macro_rules! wlog {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! wlog_error {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! wlog_warn {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! wlog_debug {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Debug, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! wlog_trace {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Trace, format_args!($($arg)*))
    };
}
