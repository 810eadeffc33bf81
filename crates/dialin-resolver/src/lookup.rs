//! Host resolution seam
//!
//! DNS sits behind a trait so the selection rule is testable without
//! touching the network and so callers can substitute their own resolver.

use async_trait::async_trait;
use std::io;
use std::net::IpAddr;

/// Resolves a hostname to its addresses.
///
/// Implementations must preserve the order the underlying resolver returned
/// the addresses in; the endpoint resolver's tie-break depends on it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Look up all A/AAAA addresses for `host`, in resolver order
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Platform resolver backed by `tokio::net::lookup_host`
#[derive(Debug, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_system_resolver_handles_localhost() {
        let addrs = SystemResolver.lookup("localhost").await.unwrap();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|addr| addr.is_loopback()));
    }
}
