//! Logging sink selection: stderr or the local syslog socket.

use anyhow::{anyhow, Context};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init(level: &str, use_syslog: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if use_syslog {
        #[cfg(unix)]
        {
            let writer = syslog::Syslog::connect("tcprelay").context("cannot open /dev/log")?;
            return tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_ansi(false)
                .with_level(false)
                .without_time()
                .with_writer(writer)
                .try_init()
                .map_err(|e| anyhow!("cannot install logger: {e}"));
        }
        #[cfg(not(unix))]
        return Err(anyhow!("syslog output is only available on unix"));
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("cannot install logger: {e}"))
}

#[cfg(unix)]
mod syslog {
    //! RFC 3164 datagrams to `/dev/log`, one per event.

    use std::io::{self, Write};
    use std::os::unix::net::UnixDatagram;
    use std::sync::Arc;
    use tcprelay_core::CRITICAL_TARGET;
    use tracing::{Level, Metadata};
    use tracing_subscriber::fmt::MakeWriter;

    const FACILITY_DAEMON: u8 = 3;

    #[derive(Clone)]
    pub struct Syslog {
        socket: Arc<UnixDatagram>,
        ident: String,
        pid: u32,
    }

    impl Syslog {
        pub fn connect(ident: &str) -> io::Result<Self> {
            let socket = UnixDatagram::unbound()?;
            socket.connect("/dev/log")?;
            Ok(Self {
                socket: Arc::new(socket),
                ident: ident.to_string(),
                pid: std::process::id(),
            })
        }

        fn line(&self, severity: u8) -> SyslogLine {
            SyslogLine {
                socket: self.socket.clone(),
                header: format!(
                    "<{}>{}[{}]: ",
                    FACILITY_DAEMON * 8 + severity,
                    self.ident,
                    self.pid
                ),
                buf: Vec::new(),
            }
        }
    }

    /// Map an event to its syslog severity. Events on the critical target
    /// rank above plain errors.
    pub(super) fn severity(level: &Level, target: &str) -> u8 {
        if target == CRITICAL_TARGET {
            return 2;
        }
        match *level {
            Level::ERROR => 3,
            Level::WARN => 4,
            Level::INFO => 6,
            _ => 7,
        }
    }

    impl<'a> MakeWriter<'a> for Syslog {
        type Writer = SyslogLine;

        fn make_writer(&'a self) -> Self::Writer {
            self.line(severity(&Level::INFO, ""))
        }

        fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
            self.line(severity(meta.level(), meta.target()))
        }
    }

    /// Buffers one formatted event and sends it when dropped.
    pub struct SyslogLine {
        socket: Arc<UnixDatagram>,
        header: String,
        buf: Vec<u8>,
    }

    impl Write for SyslogLine {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.buf.extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for SyslogLine {
        fn drop(&mut self) {
            let body = String::from_utf8_lossy(&self.buf);
            let body = body.trim_end_matches('\n');
            if body.is_empty() {
                return;
            }
            let message = format!("{}{}", self.header, body);
            // Nowhere left to report a failed log write.
            let _ = self.socket.send(message.as_bytes());
        }
    }

}
