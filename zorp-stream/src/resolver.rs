//! Hostname resolution for the connector. The wire-level data model only
//! knows [`SockAddr`]s; this turns a configured hostname into one via
//! `hickory-resolver`, short-circuiting literal IPs synchronously.
//!
//! Grounded in the teacher's `common/resolver.rs`, trimmed to the one
//! thing a dial needs: a host + port in, a connectable address out.

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use hickory_resolver::TokioResolver;

use zorp_errors::{ZorpError, ZorpResult};

use zorp_addr::SockAddr;

/// Wraps a `hickory-resolver` lookup, reused across dials so repeated
/// connects to the same pool of upstream hosts don't each pay for a
/// fresh resolver (and its own cache).
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<TokioResolver>,
}

impl Resolver {
    /// Builds a resolver from the system's `/etc/resolv.conf` (or platform
    /// equivalent).
    pub fn system() -> ZorpResult<Self> {
        let inner = TokioResolver::builder_tokio()
            .map_err(|e| ZorpError::config(e.to_string()))?
            .build();
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Resolves `host:port` to a connectable address. A literal IP
    /// resolves synchronously without touching the resolver at all;
    /// anything else is looked up and the first answer wins.
    pub async fn resolve(&self, host: &str, port: u16) -> ZorpResult<SockAddr> {
        if let Ok(ip) = IpAddr::from_str(host) {
            return Ok(sockaddr_from_ip(ip, port));
        }

        let lookup = self
            .inner
            .lookup_ip(host)
            .await
            .map_err(|e| ZorpError::config(format!("resolving {host}: {e}")))?;
        let ip = lookup
            .iter()
            .next()
            .ok_or_else(|| ZorpError::config(format!("no address found for {host}")))?;
        Ok(sockaddr_from_ip(ip, port))
    }
}

fn sockaddr_from_ip(ip: IpAddr, port: u16) -> SockAddr {
    match ip {
        IpAddr::V4(v4) => SockAddr::v4(v4, port),
        IpAddr::V6(v6) => SockAddr::v6(v6, port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn literal_ipv4_resolves_without_lookup() {
        let resolver = Resolver::system().expect("resolver should build from system config");
        let resolved = resolver.resolve("127.0.0.1", 5432).await.unwrap();
        assert_eq!(resolved, SockAddr::v4(std::net::Ipv4Addr::LOCALHOST, 5432));
    }

    #[tokio::test]
    async fn literal_ipv6_resolves_without_lookup() {
        let resolver = Resolver::system().expect("resolver should build from system config");
        let resolved = resolver.resolve("::1", 80).await.unwrap();
        assert_eq!(resolved, SockAddr::v6(std::net::Ipv6Addr::LOCALHOST, 80));
    }
}
