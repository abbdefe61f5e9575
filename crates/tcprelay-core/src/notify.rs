//! Readiness reporting seam.
//!
//! The supervisor reports "ready" once the listener is open and the number
//! of running connections after every change. What happens with that
//! information (systemd, a health endpoint, nothing) is up to the caller.

use std::net::SocketAddr;

/// Receives lifecycle updates from the relay.
pub trait ReadinessNotifier: Send + Sync {
    /// The listener is open and accepting on `local_addr`.
    fn ready(&self, local_addr: SocketAddr);

    /// The number of connection units currently running.
    fn status(&self, active: usize);
}

/// Notifier that drops every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl ReadinessNotifier for NoopNotifier {
    fn ready(&self, _local_addr: SocketAddr) {}

    fn status(&self, _active: usize) {}
}
