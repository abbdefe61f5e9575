//! systemd readiness notification over `$NOTIFY_SOCKET`.

use std::net::SocketAddr;
use std::os::unix::net::UnixDatagram;
use tcprelay_core::ReadinessNotifier;
use tracing::debug;

/// Sends `READY=1` and `STATUS=` datagrams to the service manager.
pub struct SystemdNotifier {
    socket: UnixDatagram,
}

impl SystemdNotifier {
    /// Connect to `$NOTIFY_SOCKET`. Returns `None` when the variable is
    /// unset or the socket cannot be reached, i.e. when not running under
    /// a notify-type unit.
    pub fn from_env() -> Option<Self> {
        let path = std::env::var_os("NOTIFY_SOCKET")?;
        let socket = UnixDatagram::unbound().ok()?;
        let path = path.to_string_lossy();

        let connected = match path.strip_prefix('@') {
            Some(name) => connect_abstract(&socket, name),
            None => socket.connect(&*path),
        };
        if let Err(e) = connected {
            debug!(path = %path, error = %e, "cannot reach NOTIFY_SOCKET");
            return None;
        }
        Some(Self { socket })
    }

    fn send(&self, message: &str) {
        if let Err(e) = self.socket.send(message.as_bytes()) {
            debug!(error = %e, "readiness notification failed");
        }
    }
}

#[cfg(target_os = "linux")]
fn connect_abstract(socket: &UnixDatagram, name: &str) -> std::io::Result<()> {
    use std::os::linux::net::SocketAddrExt;
    let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
    socket.connect_addr(&addr)
}

#[cfg(not(target_os = "linux"))]
fn connect_abstract(_socket: &UnixDatagram, _name: &str) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "abstract sockets are linux-only",
    ))
}

impl ReadinessNotifier for SystemdNotifier {
    fn ready(&self, local_addr: SocketAddr) {
        self.send(&format!("READY=1\nSTATUS=listening on {local_addr}"));
    }

    fn status(&self, active: usize) {
        self.send(&format!("STATUS={active} active connection(s)"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_reach_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify.sock");
        let server = UnixDatagram::bind(&path).unwrap();
        let client = UnixDatagram::unbound().unwrap();
        client.connect(&path).unwrap();
        let notifier = SystemdNotifier { socket: client };

        let mut buf = [0u8; 128];
        notifier.ready("127.0.0.1:9000".parse().unwrap());
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"READY=1\nSTATUS=listening on 127.0.0.1:9000");

        notifier.status(3);
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"STATUS=3 active connection(s)");
    }
}
