//! tcprelay-core: the connection handling and forwarding engine of tcprelay.
//!
//! Accepts TCP connections on a local port, dials one fixed upstream per
//! connection and relays bytes in both directions, optionally piping a
//! direction through an external filter command.
//!
//! # Module Architecture
//!
//! - **[`resolver`]**: host/port to a single socket address.
//! - **[`listener`]**: the listening socket and `accept`.
//! - **[`handler`]**: dials upstream for one connection and spawns its flows.
//! - **[`flow`]**: one direction of byte relay, direct or filtered.
//! - **[`filter`]**: the external filter child process.
//! - **[`supervisor`]**: accept loop, unit reaping, shutdown.
//!
//! ```text
//! Relay::serve
//!   → RelayListener::accept
//!     → ConnectionHandler::handle
//!         → AddressResolver::resolve + TcpStream::connect
//!         → spawn Flow (client→upstream), spawn Flow (upstream→client)
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod flow;
pub mod handler;
pub mod listener;
pub mod notify;
pub mod resolver;
pub mod supervisor;
pub mod tracker;

/// Tracing target for faults that warrant critical severity, such as a
/// broken filter pipe. Log sinks that know severities above `ERROR` key on it.
pub const CRITICAL_TARGET: &str = "tcprelay_core::critical";

// Re-export commonly used items at crate root.
pub use config::RelayConfig;
pub use error::{ErrorKind, RelayError, RelayResult};
pub use notify::{NoopNotifier, ReadinessNotifier};
pub use supervisor::{run, shutdown_signal, Relay};
pub use tracker::{ConnectionTracker, TrackerSnapshot};
