//! Running external tools with low priority, a timeout and cancellation

use crate::error::{Error, ExtractionError, Result};
use crate::utils::truncate_chars;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Longest tool output kept in an error message, in characters
const MAX_ERROR_OUTPUT: usize = 500;

/// Spawns tool invocations
///
/// On Unix the command is wrapped in `nice -n<level>` when a level is
/// configured and `nice` is installed.
#[derive(Clone, Debug)]
pub struct CommandRunner {
    nice: Option<(PathBuf, i32)>,
    timeout: Duration,
}

enum Outcome {
    Finished(std::io::Result<ExitStatus>, Vec<u8>, Vec<u8>),
    Canceled,
    TimedOut,
}

impl CommandRunner {
    pub fn new(nice_level: Option<i32>, timeout: Duration) -> Self {
        let nice = if cfg!(unix) {
            nice_level.and_then(|level| which::which("nice").ok().map(|path| (path, level)))
        } else {
            None
        };
        Self { nice, timeout }
    }

    fn command(&self, program: &Path, args: &[OsString]) -> Command {
        let mut cmd = match &self.nice {
            Some((nice, level)) => {
                let mut cmd = Command::new(nice);
                cmd.arg(format!("-n{}", level)).arg(program);
                cmd
            }
            None => Command::new(program),
        };
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run to completion and return trimmed stdout
    ///
    /// # Errors
    ///
    /// - [`Error::Canceled`] if `cancel` fires; the child is killed first
    /// - [`ExtractionError::TimedOut`] if the configured timeout elapses; the child is killed first
    /// - [`Error::ExternalTool`] on a non-zero exit, carrying the tool's output
    pub async fn run(
        &self,
        program: &Path,
        args: &[OsString],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let command_line = describe(program, args);
        tracing::debug!(command = %command_line, "Running command");

        let mut child = self.command(program, args).spawn().map_err(|e| {
            Error::ExternalTool(format!("Failed to execute {}: {}", program.display(), e))
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let outcome = {
            let run = async {
                let (status, out, err) =
                    tokio::join!(child.wait(), read_all(stdout), read_all(stderr));
                Outcome::Finished(status, out, err)
            };
            tokio::select! {
                outcome = run => outcome,
                _ = cancel.cancelled() => Outcome::Canceled,
                _ = tokio::time::sleep(self.timeout) => Outcome::TimedOut,
            }
        };

        match outcome {
            Outcome::Canceled => {
                child.kill().await.ok();
                tracing::info!(command = %command_line, "Command canceled");
                Err(Error::Canceled(command_line))
            }
            Outcome::TimedOut => {
                child.kill().await.ok();
                tracing::warn!(command = %command_line, timeout_secs = self.timeout.as_secs(), "Command timed out");
                Err(ExtractionError::TimedOut {
                    command: command_line,
                    secs: self.timeout.as_secs(),
                }
                .into())
            }
            Outcome::Finished(status, stdout, stderr) => {
                let status = status?;
                let stdout = String::from_utf8_lossy(&stdout).trim().to_string();
                if status.success() {
                    return Ok(stdout);
                }

                let message = failure_message(
                    String::from_utf8_lossy(&stderr).trim(),
                    &stdout,
                    status.code(),
                    &command_line,
                );
                tracing::error!(command = %command_line, error = %message, "Command failed");
                Err(Error::ExternalTool(message))
            }
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await.ok();
    }
    buf
}

fn describe(program: &Path, args: &[OsString]) -> String {
    let mut parts = vec![program.display().to_string()];
    parts.extend(args.iter().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Error text for a failed command: stderr, else stdout, else the exit code
fn failure_message(stderr: &str, stdout: &str, code: Option<i32>, command_line: &str) -> String {
    let clip = |text: &str| {
        if text.chars().count() > MAX_ERROR_OUTPUT {
            format!("{}...", truncate_chars(text, MAX_ERROR_OUTPUT))
        } else {
            text.to_string()
        }
    };

    if !stderr.is_empty() {
        clip(stderr)
    } else if !stdout.is_empty() {
        clip(stdout)
    } else {
        let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
        format!("Process failed with exit code {}: {}", code, command_line)
    }
}
