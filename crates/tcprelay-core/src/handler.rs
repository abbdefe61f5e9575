//! Per-connection handling: dial upstream, then fan out into two flows.
//!
//! The handler makes exactly one dial attempt per inbound connection. On
//! failure the client socket is shut down and dropped and no flow starts;
//! the client has to reconnect to try again. On success the two flows are
//! spawned and the handler returns immediately with their handles.

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::flow::{half_close, Direction, Flow, FlowReport};
use crate::listener::InboundConnection;
use crate::resolver::AddressResolver;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Dials the fixed upstream and starts forwarding flows.
pub struct ConnectionHandler {
    config: Arc<RelayConfig>,
}

/// Handles to the two flows of one relayed connection.
pub struct FlowPair {
    pub peer_addr: SocketAddr,
    pub upstream_addr: SocketAddr,
    outbound: JoinHandle<FlowReport>,
    inbound: JoinHandle<FlowReport>,
}

impl FlowPair {
    /// Wait for both flows. A flow task that panicked or was aborted is
    /// logged and left out of the result.
    pub async fn join(mut self) -> Vec<FlowReport> {
        let mut reports = Vec::with_capacity(2);
        for handle in [&mut self.outbound, &mut self.inbound] {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(peer = %self.peer_addr, error = %e, "flow task failed"),
            }
        }
        reports
    }
}

impl Drop for FlowPair {
    // Cancelling the owning task cancels its flows as well.
    fn drop(&mut self) {
        self.outbound.abort();
        self.inbound.abort();
    }
}

impl ConnectionHandler {
    pub fn new(config: Arc<RelayConfig>) -> Self {
        Self { config }
    }

    /// Resolve the upstream target and connect to it once.
    ///
    /// Returns the stream together with the address it was dialed on.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Resolve`] or [`RelayError::Connect`].
    pub async fn dial(&self) -> RelayResult<(TcpStream, SocketAddr)> {
        let addr =
            AddressResolver::resolve(&self.config.remote_host, self.config.remote_port).await?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| RelayError::Connect { addr, source })?;
        Ok((stream, addr))
    }

    /// Relay one accepted connection.
    ///
    /// Returns the spawned [`FlowPair`] without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns the dial error after the client socket has been closed.
    pub async fn handle(&self, inbound: InboundConnection) -> RelayResult<FlowPair> {
        let InboundConnection {
            stream: client,
            peer_addr,
        } = inbound;

        let (upstream, upstream_addr) = match self.dial().await {
            Ok(dialed) => dialed,
            Err(e) => {
                error!(
                    peer = %peer_addr,
                    upstream = %format_args!("{}:{}", self.config.remote_host, self.config.remote_port),
                    error = %e,
                    "cannot connect to upstream"
                );
                half_close(&client);
                drop(client);
                return Err(e);
            }
        };

        info!(peer = %peer_addr, upstream = %upstream_addr, "relaying connection");

        let (client_read, client_write) = client.into_split();
        let (upstream_read, upstream_write) = upstream.into_split();

        let outbound = Flow::new(
            Direction::Outbound,
            client_read,
            upstream_write,
            self.config.outbound_filter.clone(),
            self.config.buffer_size,
        );
        let inbound = Flow::new(
            Direction::Inbound,
            upstream_read,
            client_write,
            self.config.inbound_filter.clone(),
            self.config.buffer_size,
        );

        Ok(FlowPair {
            peer_addr,
            upstream_addr,
            outbound: tokio::spawn(outbound.run()),
            inbound: tokio::spawn(inbound.run()),
        })
    }
}
