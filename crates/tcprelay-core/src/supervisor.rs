//! Process lifecycle: start the listener, run the accept loop, stop on a
//! termination request.
//!
//! Every accepted connection becomes one unit in a [`JoinSet`]. The unit
//! runs the [`ConnectionHandler`] and then waits for both flows, holding a
//! [`ConnectionGuard`] the whole time.
//! Finished units are reaped from the same `select!` that accepts new
//! connections. On shutdown the listener is dropped and the set is
//! aborted; in-flight transfers are cut.

use crate::config::RelayConfig;
use crate::error::{ErrorKind, RelayResult};
use crate::handler::ConnectionHandler;
use crate::listener::{InboundConnection, RelayListener};
use crate::notify::{NoopNotifier, ReadinessNotifier};
use crate::tracker::{ConnectionGuard, ConnectionTracker};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Pause after a failed accept so a persistent failure (e.g. EMFILE) does
/// not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A relay with its listener open, ready to serve.
pub struct Relay {
    listener: RelayListener,
    handler: Arc<ConnectionHandler>,
    tracker: Arc<ConnectionTracker>,
    notifier: Arc<dyn ReadinessNotifier>,
}

impl Relay {
    /// Validate `config` and open the listener.
    ///
    /// # Errors
    ///
    /// Any error here is a startup failure; see [`crate::RelayError::exit_code`].
    pub async fn bind(config: RelayConfig) -> RelayResult<Self> {
        config.validate()?;
        let listener = RelayListener::open(
            config.bind_address.as_deref(),
            config.local_port,
            config.backlog,
        )
        .await?;

        info!(
            local = %listener.local_addr(),
            remote = %format_args!("{}:{}", config.remote_host, config.remote_port),
            inbound_filter = config.inbound_filter.as_deref().unwrap_or("-"),
            outbound_filter = config.outbound_filter.as_deref().unwrap_or("-"),
            "relay started"
        );

        Ok(Self {
            listener,
            handler: Arc::new(ConnectionHandler::new(Arc::new(config))),
            tracker: Arc::new(ConnectionTracker::new()),
            notifier: Arc::new(NoopNotifier),
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ReadinessNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn tracker(&self) -> Arc<ConnectionTracker> {
        self.tracker.clone()
    }

    /// Accept and relay connections until `shutdown` completes.
    pub async fn serve<F>(self, shutdown: F) -> RelayResult<()>
    where
        F: Future<Output = ()>,
    {
        let Relay {
            listener,
            handler,
            tracker,
            notifier,
        } = self;

        notifier.ready(listener.local_addr());
        let mut units = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("termination requested");
                    break;
                }
                Some(finished) = units.join_next(), if !units.is_empty() => {
                    if let Err(e) = finished {
                        warn!(error = %e, "connection unit failed");
                    }
                    notifier.status(tracker.active());
                }
                accepted = listener.accept() => match accepted {
                    Ok(conn) => {
                        let id = tracker.record_accept();
                        let guard = tracker.acquire();
                        debug!(id, peer = %conn.peer_addr, "connection accepted");
                        units.spawn(connection_unit(id, conn, guard, handler.clone(), tracker.clone()));
                        notifier.status(tracker.active());
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        }

        drop(listener);
        let in_flight = units.len();
        units.shutdown().await;
        info!(in_flight, "relay stopped");
        Ok(())
    }
}

async fn connection_unit(
    id: u64,
    conn: InboundConnection,
    _guard: ConnectionGuard,
    handler: Arc<ConnectionHandler>,
    tracker: Arc<ConnectionTracker>,
) {
    let peer = conn.peer_addr;

    let pair = match handler.handle(conn).await {
        Ok(pair) => pair,
        Err(_) => {
            tracker.record_dial_failure();
            return;
        }
    };

    for report in pair.join().await {
        if let Err(e) = &report.result {
            if e.kind() == ErrorKind::FilterPipe {
                tracker.record_filter_fault();
            }
        }
        debug!(id, peer = %peer, direction = %report.direction, bytes = report.bytes, "flow finished");
    }
    info!(id, peer = %peer, "connection closed");
}

/// Open the listener described by `config` and serve until SIGTERM or
/// Ctrl-C.
///
/// This is the single entry point for collaborators such as the CLI.
pub async fn run(config: RelayConfig, notifier: Arc<dyn ReadinessNotifier>) -> RelayResult<()> {
    Relay::bind(config)
        .await?
        .with_notifier(notifier)
        .serve(shutdown_signal())
        .await
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
