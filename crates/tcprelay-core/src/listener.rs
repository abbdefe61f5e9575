//! Listening endpoint.
//!
//! The socket is built with `socket2` so each setup step (create, configure,
//! bind, listen) fails with its own [`RelayError`] variant, then handed to
//! tokio for async accepts.

use crate::error::{RelayError, RelayResult};
use crate::resolver::AddressResolver;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

/// A freshly accepted client connection.
#[derive(Debug)]
pub struct InboundConnection {
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
}

/// The bound, listening socket.
#[derive(Debug)]
pub struct RelayListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl RelayListener {
    /// Resolve `bind_address`, then create, configure, bind and listen.
    ///
    /// Without a bind address the listener tries the dual-stack IPv6
    /// wildcard and falls back to `0.0.0.0` on hosts without IPv6.
    ///
    /// # Arguments
    ///
    /// * `bind_address` - Local address or hostname, `None` for the wildcard.
    /// * `port` - Local port; `0` lets the OS choose.
    /// * `backlog` - Listen queue depth.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Resolve`], [`RelayError::Socket`],
    /// [`RelayError::Configure`], [`RelayError::Bind`] or
    /// [`RelayError::Listen`] depending on which step failed.
    pub async fn open(bind_address: Option<&str>, port: u16, backlog: u32) -> RelayResult<Self> {
        let addr = AddressResolver::resolve_bind(bind_address, port).await?;
        match Self::open_addr(addr, backlog) {
            Err(RelayError::Socket(e)) if bind_address.is_none() => {
                warn!(error = %e, "IPv6 unavailable, listening on IPv4 only");
                Self::open_addr(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port), backlog)
            }
            other => other,
        }
    }

    fn open_addr(addr: SocketAddr, backlog: u32) -> RelayResult<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(RelayError::Socket)?;

        socket.set_reuse_address(true).map_err(RelayError::Configure)?;
        if addr.is_ipv6() && addr.ip().is_unspecified() {
            socket.set_only_v6(false).map_err(RelayError::Configure)?;
        }
        socket.set_nonblocking(true).map_err(RelayError::Configure)?;

        socket
            .bind(&addr.into())
            .map_err(|source| RelayError::Bind { addr, source })?;

        let depth = i32::try_from(backlog).unwrap_or(i32::MAX);
        socket
            .listen(depth)
            .map_err(|source| RelayError::Listen { addr, source })?;

        let listener = TcpListener::from_std(socket.into())
            .map_err(|source| RelayError::Listen { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| RelayError::Listen { addr, source })?;

        info!(addr = %local_addr, backlog, "listening");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The address the OS actually bound (resolves port `0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next client. Cancel-safe, so it can sit in a `select!`
    /// next to the shutdown signal.
    pub async fn accept(&self) -> RelayResult<InboundConnection> {
        let (stream, peer_addr) = self.listener.accept().await.map_err(RelayError::Accept)?;
        Ok(InboundConnection { stream, peer_addr })
    }
}
