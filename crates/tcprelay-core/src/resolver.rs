//! Address resolution via `tokio::net::lookup_host`.
//!
//! Turns a host string (or no host at all, for the bind side) plus a port
//! into a single socket address. Literal IPv4/IPv6 addresses are used as-is
//! so their family is preserved; everything else goes through name lookup.
//! Nothing here retries.

use crate::error::{RelayError, RelayResult};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use tokio::net;
use tracing::{debug, warn};

/// Stateless async address resolver.
///
/// All methods are static; the struct exists only for namespacing.
pub struct AddressResolver;

impl AddressResolver {
    /// Resolve the listening address.
    ///
    /// `None` yields the IPv6 unspecified address, which the listener binds
    /// in dual-stack mode so IPv4 peers are accepted as well.
    pub async fn resolve_bind(bind_address: Option<&str>, port: u16) -> RelayResult<SocketAddr> {
        match bind_address {
            None => Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)),
            Some(host) => Self::resolve(host, port).await,
        }
    }

    /// Resolve `host:port` to one connectable address.
    ///
    /// Bracketed IPv6 literals (`[::1]`) are accepted. When lookup returns
    /// several addresses the first one wins.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Resolve`] if the lookup fails or yields nothing.
    pub async fn resolve(host: &str, port: u16) -> RelayResult<SocketAddr> {
        if let Some(ip) = parse_literal(host) {
            return Ok(SocketAddr::new(ip, port));
        }

        match net::lookup_host((host, port)).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => {
                    debug!(host = %host, addr = %addr, "resolved");
                    Ok(addr)
                }
                None => Err(RelayError::Resolve {
                    host: host.to_string(),
                    reason: "no addresses found".to_string(),
                }),
            },
            Err(e) => {
                warn!(host = %host, error = %e, "name resolution failed");
                Err(RelayError::Resolve {
                    host: host.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn parse_literal(host: &str) -> Option<IpAddr> {
    let trimmed = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    trimmed.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_wildcard_bind_is_ipv6_unspecified() {
        let addr = AddressResolver::resolve_bind(None, 9000).await.unwrap();
        assert_eq!(addr.ip(), IpAddr::V6(Ipv6Addr::UNSPECIFIED));
        assert_eq!(addr.port(), 9000);
    }

    #[tokio::test]
    async fn test_literal_keeps_family() {
        let v4 = AddressResolver::resolve("127.0.0.1", 80).await.unwrap();
        assert_eq!(v4.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));

        let v6 = AddressResolver::resolve("::1", 80).await.unwrap();
        assert_eq!(v6.ip(), IpAddr::V6(Ipv6Addr::LOCALHOST));

        let bracketed = AddressResolver::resolve("[::1]", 81).await.unwrap();
        assert_eq!(bracketed, "[::1]:81".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let addr = AddressResolver::resolve("localhost", 8080).await;
        assert!(addr.is_ok(), "localhost should resolve: {:?}", addr);
        let addr = addr.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 8080);
    }

    #[tokio::test]
    async fn test_resolve_invalid() {
        let result =
            AddressResolver::resolve("this.host.definitely.does.not.exist.invalid", 80).await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Resolve);
    }
}
