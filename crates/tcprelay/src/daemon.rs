//! Detach from the terminal.
//!
//! The relay re-executes itself with `--foreground` in a new process
//! group. The child's stdin points at `/dev/null` and its stdout is a pipe
//! back to the parent. Once the child's listener is open it writes a single
//! ready line on that pipe. The parent waits for that line and exits 0, or
//! exits with the child's own status if the child dies first, so startup
//! failures still reach the caller. Stderr stays attached to both.

use anyhow::Context;
use std::io::Write;
use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::Arc;
use tcprelay_core::ReadinessNotifier;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Present in the environment of the detached child.
pub const DETACHED_ENV: &str = "TCPRELAY_DETACHED";

const READY_LINE: &str = "ready";

/// How the detached child came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detached {
    /// Listening; the parent can exit successfully.
    Ready { pid: u32 },
    /// Exited before its listener was open.
    Failed { code: i32 },
}

/// Spawn the detached copy and wait until it is listening or has died.
pub async fn detach() -> anyhow::Result<Detached> {
    let exe = std::env::current_exe().context("cannot locate own executable")?;

    let mut cmd = Command::new(exe);
    cmd.args(std::env::args_os().skip(1))
        .arg("--foreground")
        .env(DETACHED_ENV, "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().context("cannot daemonize")?;
    let pid = child.id().unwrap_or_default();
    let stdout = child
        .stdout
        .take()
        .context("detached child has no stdout pipe")?;

    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .await
        .context("cannot read readiness from detached child")?;
    if line.trim_end() == READY_LINE {
        return Ok(Detached::Ready { pid });
    }

    // EOF without the ready line: the child is on its way out.
    let status = child
        .wait()
        .await
        .context("cannot wait for detached child")?;
    Ok(Detached::Failed {
        code: status.code().unwrap_or(1),
    })
}

/// Readiness notifier for the detached child: tells the waiting parent the
/// listener is open, then forwards everything to `inner`.
pub struct DetachedNotifier {
    inner: Arc<dyn ReadinessNotifier>,
}

impl DetachedNotifier {
    pub fn new(inner: Arc<dyn ReadinessNotifier>) -> Self {
        Self { inner }
    }
}

impl ReadinessNotifier for DetachedNotifier {
    fn ready(&self, local_addr: SocketAddr) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{READY_LINE}").and_then(|()| out.flush()) {
            debug!(error = %e, "cannot signal readiness to parent");
        }
        self.inner.ready(local_addr);
    }

    fn status(&self, active: usize) {
        self.inner.status(active);
    }
}
