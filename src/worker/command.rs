//! Timed execution of workload-manager command-line tools.

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::{wlog_trace, wlog_warn, Error, Result};

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub(crate) struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// stderr fragments meaning the controller could not be reached.
static TRANSIENT_STDERR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(timed out|unable to contact|connection refused|try again|temporarily unavailable|cannot connect to server|communication failure)",
    )
    .unwrap()
});

/// Run `program` with `args`, optionally feeding `stdin`, bounded by `limit`.
///
/// Expiry and spawn failures surface as `Error::WorkerUnavailable`.
/// A non-zero exit is returned as an unsuccessful `CommandOutput`.
pub(crate) async fn run(
    program: &str,
    args: &[&str],
    stdin: Option<&str>,
    limit: Duration,
) -> Result<CommandOutput> {
    wlog_trace!("exec {} {}", program, args.join(" "));
    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::WorkerUnavailable(format!("{}: {}", program, e)))?;

    let pipe = child.stdin.take();
    let exchange = async move {
        if let (Some(input), Some(mut pipe)) = (stdin, pipe) {
            match pipe.write_all(input.as_bytes()).await {
                // The tool closed its input early; its exit status decides
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                other => other?,
            }
            // Dropping the pipe closes it so the tool sees EOF
            drop(pipe);
        }
        child.wait_with_output().await
    };

    let output = match timeout(limit, exchange).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(Error::WorkerUnavailable(format!("{}: {}", program, e)));
        }
        Err(_) => {
            wlog_warn!("{} timed out after {:?}", program, limit);
            return Err(Error::WorkerUnavailable(format!(
                "{} timed out after {:?}",
                program, limit
            )));
        }
    };

    let result = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        success: output.status.success(),
    };
    wlog_trace!(
        "{} exit_ok={} stdout={:?} stderr={:?}",
        program,
        result.success,
        result.stdout.trim(),
        result.stderr.trim()
    );
    Ok(result)
}

/// Turn an unsuccessful command into the matching error class.
pub(crate) fn failure(program: &str, output: &CommandOutput) -> Error {
    let stderr = output.stderr.trim();
    if TRANSIENT_STDERR_RE.is_match(stderr) {
        Error::WorkerUnavailable(format!("{}: {}", program, stderr))
    } else {
        Error::Worker(format!("{}: {}", program, stderr))
    }
}
