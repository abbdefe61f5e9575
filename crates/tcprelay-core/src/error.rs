use std::net::SocketAddr;
use thiserror::Error;

/// Errors produced by the relay engine.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("cannot create socket: {0}")]
    Socket(#[source] std::io::Error),

    #[error("cannot configure socket: {0}")]
    Configure(#[source] std::io::Error),

    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot resolve {host}: {reason}")]
    Resolve { host: String, reason: String },

    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot start filter `{command}`: {source}")]
    FilterSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write to filter `{command}`: {source}")]
    BrokenPipe {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of a [`RelayError`].
///
/// Startup errors end the process; every other class is contained to the
/// connection (or flow) it happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Socket create/configure/bind/listen or invalid configuration.
    Startup,
    /// Name lookup or address parse failure, on either the bind or dial side.
    Resolve,
    /// A failed `accept()`; the listener keeps running.
    Accept,
    /// Upstream unreachable. One attempt per inbound connection.
    Dial,
    /// Ordinary read/write failure inside a forwarding flow.
    FlowIo,
    /// Broken communication with an external filter process.
    FilterPipe,
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Socket(_)
            | RelayError::Configure(_)
            | RelayError::Bind { .. }
            | RelayError::Listen { .. }
            | RelayError::Config(_) => ErrorKind::Startup,
            RelayError::Resolve { .. } => ErrorKind::Resolve,
            RelayError::Accept(_) => ErrorKind::Accept,
            RelayError::Connect { .. } => ErrorKind::Dial,
            RelayError::FilterSpawn { .. } | RelayError::BrokenPipe { .. } => {
                ErrorKind::FilterPipe
            }
            RelayError::Io(_) => ErrorKind::FlowIo,
        }
    }

    /// Process exit status used when this error aborts startup.
    ///
    /// `2` is left to the CLI for usage errors and `1` is the generic
    /// runtime failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            RelayError::Socket(_) => 3,
            RelayError::Configure(_) => 4,
            RelayError::Bind { .. } => 5,
            RelayError::Listen { .. } => 6,
            RelayError::Resolve { .. } => 7,
            RelayError::Config(_) => 8,
            _ => 1,
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn io_err() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::Other, "boom")
    }

    #[test]
    fn test_startup_errors_have_distinct_exit_codes() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let codes = [
            RelayError::Socket(io_err()).exit_code(),
            RelayError::Configure(io_err()).exit_code(),
            RelayError::Bind { addr, source: io_err() }.exit_code(),
            RelayError::Listen { addr, source: io_err() }.exit_code(),
            RelayError::Resolve { host: "x".into(), reason: "y".into() }.exit_code(),
            RelayError::Config("bad".into()).exit_code(),
        ];
        let mut sorted = codes.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
        assert!(codes.iter().all(|&c| c != 0 && c != 1 && c != 2));
    }

    #[test]
    fn test_kind_classification() {
        let addr: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        assert_eq!(
            RelayError::Connect { addr, source: io_err() }.kind(),
            ErrorKind::Dial
        );
        assert_eq!(
            RelayError::BrokenPipe { command: "cat".into(), source: io_err() }.kind(),
            ErrorKind::FilterPipe
        );
        assert_eq!(RelayError::Io(io_err()).kind(), ErrorKind::FlowIo);
        assert_eq!(
            RelayError::Resolve { host: "h".into(), reason: "r".into() }.kind(),
            ErrorKind::Resolve
        );
        assert_eq!(RelayError::Bind { addr, source: io_err() }.kind(), ErrorKind::Startup);
    }
}
