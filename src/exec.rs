use std::ffi::OsStr;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured result of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr, trimmed, for error messages.
    pub fn diagnostics(&self) -> String {
        let mut text = self.stdout.trim_end().to_string();
        let err = self.stderr.trim_end();
        if !err.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(err);
        }
        text
    }
}

/// Runs `program` to completion, capturing both streams.
///
/// The child is killed once `limit` elapses and the call fails with
/// [`io::ErrorKind::TimedOut`].
pub async fn run<S: AsRef<OsStr>>(
    program: S,
    args: &[&str],
    limit: Duration,
) -> io::Result<CommandOutput> {
    let program = program.as_ref();
    debug!("Running command: {} {:?}", program.to_string_lossy(), args);

    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null()).kill_on_drop(true);
    let output = match tokio::time::timeout(limit, command.output()).await {
        Ok(output) => output?,
        Err(_) => {
            warn!("Command {} timed out after {:?}", program.to_string_lossy(), limit);
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("timed out after {:?}", limit),
            ));
        }
    };

    debug!("Command finished with exit code: {:?}", output.status.code());
    Ok(CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Like [`run`] but through `sh -c`, for pipelines such as the acme.sh bootstrap.
pub async fn run_shell(script: &str, limit: Duration) -> io::Result<CommandOutput> {
    run("sh", &["-c", script], limit).await
}

pub fn is_timeout(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::TimedOut
}
