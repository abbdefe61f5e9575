//! One direction of a relayed connection.
//!
//! A [`Flow`] copies bytes from a source socket half to a destination
//! socket half until EOF or an error, either directly or through an
//! external [`FilterProcess`]. When it ends normally it shuts down both
//! directions of the destination and then the source socket, so the
//! peers notice promptly even while the sibling flow is still blocked.
//! The file descriptors themselves close once both flows have dropped
//! their halves.

use crate::error::{ErrorKind, RelayError, RelayResult};
use crate::filter::FilterProcess;
use crate::CRITICAL_TARGET;
use socket2::SockRef;
use std::fmt;
use std::net::Shutdown;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::process::{ChildStdin, ChildStdout};
use tracing::{debug, error, warn};

/// Which way a flow moves bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client → upstream.
    Outbound,
    /// Upstream → client.
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => write!(f, "client->upstream"),
            Direction::Inbound => write!(f, "upstream->client"),
        }
    }
}

/// Outcome of a finished flow.
#[derive(Debug)]
pub struct FlowReport {
    pub direction: Direction,
    /// Bytes written to the destination.
    pub bytes: u64,
    /// `Ok` on clean EOF.
    pub result: RelayResult<()>,
}

/// A single forwarding flow, ready to run.
pub struct Flow {
    direction: Direction,
    source: OwnedReadHalf,
    dest: OwnedWriteHalf,
    filter: Option<String>,
    buffer_size: usize,
}

impl Flow {
    pub fn new(
        direction: Direction,
        source: OwnedReadHalf,
        dest: OwnedWriteHalf,
        filter: Option<String>,
        buffer_size: usize,
    ) -> Self {
        Self {
            direction,
            source,
            dest,
            filter,
            buffer_size: buffer_size.max(1),
        }
    }

    /// Run the flow to completion. Never panics on I/O failure; the
    /// outcome is returned in the [`FlowReport`].
    pub async fn run(self) -> FlowReport {
        match self.filter.clone() {
            Some(command) => self.run_filtered(command).await,
            None => self.run_direct().await,
        }
    }

    async fn run_direct(mut self) -> FlowReport {
        let direction = self.direction;
        let mut buf = vec![0u8; self.buffer_size];
        let (bytes, result) = pump(&mut self.source, &mut self.dest, &mut buf).await;

        match &result {
            Ok(()) => debug!(%direction, bytes, "flow reached EOF"),
            Err(e) => debug!(%direction, bytes, error = %e, "flow ended with error"),
        }

        half_close(self.dest.as_ref());
        half_close(self.source.as_ref());

        FlowReport {
            direction,
            bytes,
            result: result.map_err(RelayError::Io),
        }
    }

    async fn run_filtered(self, command: String) -> FlowReport {
        let Flow {
            direction,
            mut source,
            mut dest,
            buffer_size,
            ..
        } = self;

        let (filter, stdin, stdout) = match FilterProcess::spawn(&command) {
            Ok(spawned) => spawned,
            Err(e) => {
                error!(
                    target: CRITICAL_TARGET,
                    %direction,
                    severity = "critical",
                    error = %e,
                    "cannot start filter"
                );
                return FlowReport {
                    direction,
                    bytes: 0,
                    result: Err(e),
                };
            }
        };

        let mut fed = 0u64;
        let mut delivered = 0u64;
        let result = tokio::try_join!(
            feed_filter(&mut source, stdin, &command, buffer_size, &mut fed),
            drain_filter(stdout, &mut dest, buffer_size, &mut delivered),
        )
        .map(|_| ());

        match &result {
            Ok(()) => {
                debug!(%direction, fed, delivered, "filtered flow reached EOF");
                half_close(dest.as_ref());
                half_close(source.as_ref());
                filter.reap(false).await;
            }
            Err(e) if e.kind() == ErrorKind::FilterPipe => {
                // The shared sockets stay up so the sibling flow keeps running.
                error!(
                    target: CRITICAL_TARGET,
                    %direction,
                    severity = "critical",
                    fed,
                    error = %e,
                    "broken filter pipe"
                );
                drop(source);
                drop(dest);
                filter.reap(true).await;
            }
            Err(e) => {
                debug!(%direction, fed, delivered, error = %e, "filtered flow ended with error");
                half_close(dest.as_ref());
                half_close(source.as_ref());
                filter.reap(true).await;
            }
        }

        FlowReport {
            direction,
            bytes: delivered,
            result,
        }
    }
}

/// Copy `source` into `dest` until EOF, writing every chunk in full
/// before the next read.
///
/// Returns the number of bytes written and how the copy ended.
pub async fn pump<R, W>(source: &mut R, dest: &mut W, buf: &mut [u8]) -> (u64, std::io::Result<()>)
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut total = 0u64;
    loop {
        let n = match source.read(buf).await {
            Ok(0) => return (total, Ok(())),
            Ok(n) => n,
            Err(e) => return (total, Err(e)),
        };
        if let Err(e) = dest.write_all(&buf[..n]).await {
            return (total, Err(e));
        }
        total += n as u64;
    }
}

async fn feed_filter(
    source: &mut OwnedReadHalf,
    mut stdin: ChildStdin,
    command: &str,
    buffer_size: usize,
    fed: &mut u64,
) -> RelayResult<()> {
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            // Dropping stdin closes the pipe so the filter sees EOF and flushes.
            drop(stdin);
            return Ok(());
        }
        stdin
            .write_all(&buf[..n])
            .await
            .map_err(|source| RelayError::BrokenPipe {
                command: command.to_string(),
                source,
            })?;
        *fed += n as u64;
    }
}

async fn drain_filter(
    mut stdout: ChildStdout,
    dest: &mut OwnedWriteHalf,
    buffer_size: usize,
    delivered: &mut u64,
) -> RelayResult<()> {
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        dest.write_all(&buf[..n]).await?;
        *delivered += n as u64;
    }
}

/// Shut down both directions of `stream` without releasing the descriptor.
pub(crate) fn half_close(stream: &TcpStream) {
    // ENOTCONN is expected when the sibling flow got here first.
    if let Err(e) = SockRef::from(stream).shutdown(Shutdown::Both) {
        if e.kind() != std::io::ErrorKind::NotConnected {
            warn!(error = %e, "socket shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Two connected loopback sockets: (accepted side, connecting side).
    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (connected, accepted) =
            tokio::join!(TcpStream::connect(addr), listener.accept());
        (accepted.unwrap().0, connected.unwrap())
    }

    #[tokio::test]
    async fn test_pump_preserves_bytes() {
        let payloads: Vec<Vec<u8>> = vec![
            Vec::new(),
            b"ping".to_vec(),
            (0..100_000u32).map(|i| (i % 251) as u8).collect(),
        ];
        for payload in payloads {
            let mut source: &[u8] = &payload;
            let mut dest = Vec::new();
            let mut buf = [0u8; 7];
            let (bytes, result) = pump(&mut source, &mut dest, &mut buf).await;
            assert!(result.is_ok());
            assert_eq!(bytes, payload.len() as u64);
            assert_eq!(dest, payload);
        }
    }

    #[tokio::test]
    async fn test_pump_reports_write_failure() {
        let (mut a, b) = tokio::io::duplex(64);
        drop(b);
        let mut source: &[u8] = b"data";
        let mut buf = [0u8; 16];
        let (bytes, result) = pump(&mut source, &mut a, &mut buf).await;
        assert_eq!(bytes, 0);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_direct_flow_eof_closes_both_sides() {
        let (src_local, mut src_peer) = socket_pair().await;
        let (dst_local, mut dst_peer) = socket_pair().await;

        let (src_read, _src_write) = src_local.into_split();
        let (_dst_read, dst_write) = dst_local.into_split();
        let flow = Flow::new(Direction::Outbound, src_read, dst_write, None, 16 * 1024);
        let handle = tokio::spawn(flow.run());

        src_peer.write_all(b"payload").await.unwrap();
        src_peer.shutdown().await.unwrap();

        let mut received = Vec::new();
        dst_peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"payload");

        let report = handle.await.unwrap();
        assert_eq!(report.direction, Direction::Outbound);
        assert_eq!(report.bytes, 7);
        assert!(report.result.is_ok());

        // The source socket was shut down too, so its peer reads EOF.
        let mut rest = Vec::new();
        let n = src_peer.read_to_end(&mut rest).await.unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_filtered_flow_streams_large_payload() {
        let (src_local, mut src_peer) = socket_pair().await;
        let (dst_local, mut dst_peer) = socket_pair().await;

        let (src_read, _src_write) = src_local.into_split();
        let (_dst_read, dst_write) = dst_local.into_split();
        let flow = Flow::new(
            Direction::Inbound,
            src_read,
            dst_write,
            Some("cat".to_string()),
            4096,
        );
        let handle = tokio::spawn(flow.run());

        let payload: Vec<u8> = (0..1_000_000u32).map(|i| (i % 256) as u8).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            src_peer.write_all(&payload).await.unwrap();
            src_peer.shutdown().await.unwrap();
            src_peer
        });

        let mut received = Vec::new();
        dst_peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received.len(), expected.len());
        assert!(received == expected);

        let report = handle.await.unwrap();
        assert!(report.result.is_ok());
        assert_eq!(report.bytes, expected.len() as u64);
        drop(writer.await.unwrap());
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Outbound.to_string(), "client->upstream");
        assert_eq!(Direction::Inbound.to_string(), "upstream->client");
    }
}
