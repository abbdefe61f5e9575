//! Process-wide connection bookkeeping.
//!
//! All counters are atomics so connection units can update them from any
//! task without locks. Values read with `Relaxed` ordering are suitable for
//! logging and readiness status, not for synchronisation.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Counters shared by the accept loop and every connection unit.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    accepted: AtomicU64,
    active: Arc<AtomicUsize>,
    dial_failures: AtomicU64,
    filter_faults: AtomicU64,
}

/// Point-in-time copy of the tracker counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSnapshot {
    pub accepted: u64,
    pub active: usize,
    pub dial_failures: u64,
    pub filter_faults: u64,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an accepted connection and return its 1-based sequence number.
    pub fn record_accept(&self) -> u64 {
        self.accepted.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Increment the active count. Returns an owned guard that decrements
    /// on drop; move it into the connection unit so the connection stays
    /// counted until both of its flows are done.
    pub fn acquire(&self) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            counter: self.active.clone(),
        }
    }

    pub fn record_dial_failure(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_filter_fault(&self) {
        self.filter_faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Connections whose unit has not finished yet.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            active: self.active(),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            filter_faults: self.filter_faults.load(Ordering::Relaxed),
        }
    }
}

/// RAII guard that decrements the active count on drop.
/// Owns an `Arc<AtomicUsize>` so it is `Send` and can be moved into spawned tasks.
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
