//! External filter process.
//!
//! A filter is any shell command that reads a byte stream on stdin and
//! writes the transformed stream to stdout. It runs via `sh -c` so the
//! command line can use pipes and quoting. The child lives exactly as long
//! as the flow that started it.

use crate::error::{RelayError, RelayResult};
use std::process::Stdio;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// A running filter with its two byte channels.
pub struct FilterProcess {
    command: String,
    child: Child,
}

impl FilterProcess {
    /// Start `command` with piped stdin and stdout. Stderr is inherited so
    /// filter diagnostics reach the relay's own stderr.
    ///
    /// Returns the process handle along with the channel feeding its input
    /// and the channel draining its output.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::FilterSpawn`] if the shell cannot be started.
    pub fn spawn(command: &str) -> RelayResult<(Self, ChildStdin, ChildStdout)> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let spawn_err = |source: std::io::Error| RelayError::FilterSpawn {
            command: command.to_string(),
            source,
        };

        let mut child = cmd.spawn().map_err(spawn_err)?;
        let stdin = child.stdin.take().ok_or_else(|| {
            spawn_err(std::io::Error::new(std::io::ErrorKind::Other, "stdin not captured"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            spawn_err(std::io::Error::new(std::io::ErrorKind::Other, "stdout not captured"))
        })?;

        debug!(command = %command, pid = child.id(), "filter started");

        Ok((
            Self {
                command: command.to_string(),
                child,
            },
            stdin,
            stdout,
        ))
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Wait for the filter to exit so it does not linger as a zombie.
    ///
    /// With `kill` set the child is signalled first; used when the flow
    /// ended abnormally and the filter may still be blocked on its pipes.
    /// The exit status is only logged.
    pub async fn reap(mut self, kill: bool) {
        if kill {
            if let Err(e) = self.child.start_kill() {
                debug!(command = %self.command, error = %e, "filter already exited");
            }
        }
        match self.child.wait().await {
            Ok(status) => debug!(command = %self.command, %status, "filter exited"),
            Err(e) => warn!(command = %self.command, error = %e, "failed to reap filter"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_filter_transforms_stream() {
        let (filter, mut stdin, mut stdout) = FilterProcess::spawn("tr a-z A-Z").unwrap();
        assert_eq!(filter.command(), "tr a-z A-Z");

        stdin.write_all(b"hello filter").await.unwrap();
        drop(stdin);

        let mut out = Vec::new();
        stdout.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"HELLO FILTER");
        filter.reap(false).await;
    }

    #[tokio::test]
    async fn test_reap_kills_stuck_filter() {
        let (filter, _stdin, _stdout) = FilterProcess::spawn("sleep 30").unwrap();
        let reaped = tokio::time::timeout(std::time::Duration::from_secs(5), filter.reap(true)).await;
        assert!(reaped.is_ok(), "killed filter should be reaped promptly");
    }
}
