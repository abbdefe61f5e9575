//! Relay configuration value object.
//!
//! Built once at startup (by the CLI or any other collaborator), validated,
//! then shared read-only between the listener and every connection handler.

use crate::error::{RelayError, RelayResult};

/// Listen backlog the relay uses unless told otherwise.
pub const DEFAULT_BACKLOG: u32 = 20;

/// Size of the per-flow copy buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Immutable relay configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Local address to bind. `None` binds the dual-stack wildcard.
    pub bind_address: Option<String>,
    /// Local port to accept connections on. `0` lets the OS pick one.
    pub local_port: u16,
    /// Upstream host every connection is relayed to.
    pub remote_host: String,
    /// Upstream port.
    pub remote_port: u16,
    /// Filter command for bytes flowing upstream → client.
    pub inbound_filter: Option<String>,
    /// Filter command for bytes flowing client → upstream.
    pub outbound_filter: Option<String>,
    /// Listen queue depth.
    pub backlog: u32,
    /// Per-flow read buffer size in bytes.
    pub buffer_size: usize,
}

impl RelayConfig {
    /// Create a config with no bind address, no filters and default tuning.
    pub fn new(local_port: u16, remote_host: impl Into<String>, remote_port: u16) -> Self {
        Self {
            bind_address: None,
            local_port,
            remote_host: remote_host.into(),
            remote_port,
            inbound_filter: None,
            outbound_filter: None,
            backlog: DEFAULT_BACKLOG,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_bind_address(mut self, addr: impl Into<String>) -> Self {
        self.bind_address = Some(addr.into());
        self
    }

    pub fn with_inbound_filter(mut self, command: impl Into<String>) -> Self {
        self.inbound_filter = Some(command.into());
        self
    }

    pub fn with_outbound_filter(mut self, command: impl Into<String>) -> Self {
        self.outbound_filter = Some(command.into());
        self
    }

    /// Check the values a running relay depends on.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] describing the first invalid field.
    pub fn validate(&self) -> RelayResult<()> {
        if self.remote_host.trim().is_empty() {
            return Err(RelayError::Config("remote host is empty".into()));
        }
        if self.remote_port == 0 {
            return Err(RelayError::Config("remote port must be non-zero".into()));
        }
        if self.buffer_size == 0 {
            return Err(RelayError::Config("buffer size must be non-zero".into()));
        }
        if self.backlog == 0 {
            return Err(RelayError::Config("backlog must be non-zero".into()));
        }
        for (name, filter) in [
            ("inbound filter", &self.inbound_filter),
            ("outbound filter", &self.outbound_filter),
        ] {
            if matches!(filter, Some(cmd) if cmd.trim().is_empty()) {
                return Err(RelayError::Config(format!("{name} command is empty")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = RelayConfig::new(9000, "localhost", 9001);
        assert_eq!(cfg.backlog, DEFAULT_BACKLOG);
        assert_eq!(cfg.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(cfg.bind_address.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_host_and_zero_port() {
        assert!(RelayConfig::new(9000, " ", 9001).validate().is_err());
        assert!(RelayConfig::new(9000, "localhost", 0).validate().is_err());
    }

    #[test]
    fn test_rejects_blank_filter() {
        let cfg = RelayConfig::new(9000, "localhost", 9001).with_outbound_filter("  ");
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("outbound filter"));
    }
}
