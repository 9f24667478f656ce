//! CIDR-aware, IPv4-only host resolution with a bounded DNS timeout.
use crate::blocklist::Blocklist;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::net::lookup_host;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("invalid host:port {0:?}")]
    InvalidHostPort(String),

    #[error("invalid port number")]
    InvalidPort,

    #[error("DNS lookup failed: {0}")]
    Lookup(#[from] std::io::Error),

    #[error("DNS lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("not an IPv4 address")]
    NotIpv4Address,

    #[error("ip is blocked")]
    Blocked,
}

/// Resolves `host:port` to an IPv4 address, applying the blocklist (if
/// present) to both literal IPs and DNS results.
#[instrument(skip(blocklist), fields(hostport))]
pub async fn resolve(
    hostport: &str,
    timeout: Duration,
    blocklist: Option<&Blocklist>,
) -> Result<(Ipv4Addr, u16), ResolverError> {
    let (ip, port) = if let Ok(addr) = hostport.parse::<SocketAddr>() {
        (addr.ip(), addr.port())
    } else {
        let (host, port_str) = hostport
            .rsplit_once(':')
            .ok_or_else(|| ResolverError::InvalidHostPort(hostport.to_string()))?;
        let port: u32 = port_str
            .parse()
            .map_err(|_| ResolverError::InvalidHostPort(hostport.to_string()))?;
        if port == 0 || port > 65535 {
            return Err(ResolverError::InvalidPort);
        }
        let resolved = resolve_ipv4(host, timeout).await?;
        (resolved, port as u16)
    };

    if port == 0 {
        return Err(ResolverError::InvalidPort);
    }

    let ipv4 = match ip {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(_) => return Err(ResolverError::NotIpv4Address),
    };

    if let Some(bl) = blocklist {
        if bl.blocked(IpAddr::V4(ipv4)) {
            return Err(ResolverError::Blocked);
        }
    }

    Ok((ipv4, port))
}

async fn resolve_ipv4(host: &str, timeout: Duration) -> Result<IpAddr, ResolverError> {
    let lookup = lookup_host((host, 0));
    let addrs = tokio::time::timeout(timeout, lookup)
        .await
        .map_err(|_| ResolverError::Timeout(timeout))??;

    addrs
        .map(|addr| addr.ip())
        .find(IpAddr::is_ipv4)
        .ok_or(ResolverError::NotIpv4Address)
}

/// Resolves a bare host (no port) to every blocklist-permitted IPv4
/// address, for callers such as the HTTP tracker's connection pool that
/// need all candidate addresses rather than a single one.
#[instrument(skip(blocklist))]
pub async fn resolve_host(
    host: &str,
    timeout: Duration,
    blocklist: Option<&Blocklist>,
) -> Result<Vec<Ipv4Addr>, ResolverError> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        if let Some(bl) = blocklist {
            if bl.blocked(IpAddr::V4(ip)) {
                return Err(ResolverError::Blocked);
            }
        }
        return Ok(vec![ip]);
    }

    let lookup = lookup_host((host, 0));
    let addrs = tokio::time::timeout(timeout, lookup)
        .await
        .map_err(|_| ResolverError::Timeout(timeout))??;

    let resolved: Vec<Ipv4Addr> = addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .filter(|ip| match blocklist {
            Some(bl) => !bl.blocked(IpAddr::V4(*ip)),
            None => true,
        })
        .collect();

    if resolved.is_empty() {
        return Err(ResolverError::NotIpv4Address);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_literal_ipv4_without_dns() {
        let (ip, port) = resolve("127.0.0.1:6881", Duration::from_secs(1), None)
            .await
            .unwrap();
        assert_eq!(ip, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(port, 6881);
    }

    #[tokio::test]
    async fn rejects_literal_ipv6() {
        let err = resolve("[::1]:6881", Duration::from_secs(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::NotIpv4Address));
    }

    #[tokio::test]
    async fn rejects_out_of_range_port() {
        let err = resolve("127.0.0.1:0", Duration::from_secs(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::InvalidPort));
    }

    #[tokio::test]
    async fn resolve_host_returns_literal_ipv4_unfiltered() {
        let addrs = resolve_host("10.0.0.1", Duration::from_secs(1), None)
            .await
            .unwrap();
        assert_eq!(addrs, vec![Ipv4Addr::new(10, 0, 0, 1)]);
    }

    #[tokio::test]
    async fn resolve_host_rejects_blocked_literal_ip() {
        let bl = Blocklist::new();
        bl.load(std::io::Cursor::new("10.0.0.0/8\n")).unwrap();
        let err = resolve_host("10.0.0.1", Duration::from_secs(1), Some(&bl))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::Blocked));
    }

    #[tokio::test]
    async fn applies_blocklist_to_literal_ip() {
        let bl = Blocklist::new();
        bl.load(std::io::Cursor::new("127.0.0.0/8\n")).unwrap();
        let err = resolve("127.0.0.1:6881", Duration::from_secs(1), Some(&bl))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::Blocked));
    }
}
