//! Tunnel endpoint resolution
//!
//! This module polls the agent's local status API until it reports a tunnel
//! of the requested protocol, then turns that tunnel's public URL into a
//! dialable (address, port) pair. Agent startup, tunnel registration and DNS
//! propagation are all slower than the automation that calls this, so
//! transient failures are retried within a bounded attempt budget.

use crate::descriptor::{parse_descriptors, TunnelDescriptor, TunnelProtocol};
use crate::lookup::{HostResolver, SystemResolver};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Endpoint resolution errors
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The status endpoint did not produce a usable HTTP response
    #[error("tunnel agent unreachable at {url}: {reason}")]
    AgentUnreachable { url: String, reason: String },

    /// The status endpoint answered, but not with a descriptor list
    #[error("malformed status response: {reason}")]
    MalformedStatus { reason: String },

    /// The agent is up but reports no tunnel of the requested protocol
    #[error("no {protocol} tunnel among {available} reported tunnel(s)")]
    NoMatchingTunnel {
        protocol: TunnelProtocol,
        available: usize,
    },

    /// A matching descriptor carried a public URL that does not name a host
    #[error("malformed public URL: {url}")]
    MalformedUrl { url: String },

    /// The public URL has no port and the protocol has no default
    #[error("no port in public URL {url} and {protocol} has no default port")]
    MissingPort {
        url: String,
        protocol: TunnelProtocol,
    },

    /// Lookup of the public host failed or returned no addresses
    #[error("failed to resolve {host}: {reason}")]
    ResolutionFailed { host: String, reason: String },

    /// Attempt budget exhausted without a usable tunnel
    #[error("no usable tunnel after {attempts} attempt(s)")]
    Timeout {
        attempts: u32,
        #[source]
        last: Box<ResolveError>,
    },

    /// The caller cancelled the resolution
    #[error("resolution cancelled")]
    Cancelled,
}

impl ResolveError {
    /// Structural failures that waiting cannot fix.
    ///
    /// Everything else is retried within the attempt budget.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ResolveError::MalformedUrl { .. }
                | ResolveError::MissingPort { .. }
                | ResolveError::Cancelled
        )
    }
}

/// A dialable endpoint derived from one tunnel descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionEndpoint {
    /// Numeric address of the tunnel's public host
    pub host: IpAddr,
    /// Public transport port
    pub port: u16,
}

impl fmt::Display for ConnectionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host {
            IpAddr::V6(addr) => write!(f, "[{}]:{}", addr, self.port),
            IpAddr::V4(addr) => write!(f, "{}:{}", addr, self.port),
        }
    }
}

/// Tunnel endpoint resolver - polls the agent status API and resolves the
/// public endpoint of the first tunnel matching the requested protocol.
///
/// Holds no state across calls; one resolver can serve concurrent
/// resolutions for different protocols.
pub struct EndpointResolver {
    http: reqwest::Client,
    resolver: Arc<dyn HostResolver>,
    max_attempts: u32,
    poll_interval: Duration,
    request_timeout: Duration,
}

impl EndpointResolver {
    /// Create a resolver with the default polling policy
    /// (30 attempts, 2s apart, 5s per request)
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            resolver: Arc::new(SystemResolver),
            max_attempts: 30,
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
        }
    }

    /// Set the attempt budget (clamped to at least one attempt)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the wait between attempts
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the per-request HTTP timeout
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Replace the host resolver (tests use this to avoid real DNS)
    pub fn with_host_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Resolve the agent's first `protocol` tunnel to a dialable endpoint.
    ///
    /// Polls `status_url` up to the attempt budget, waiting the poll
    /// interval between attempts. Transient failures (agent not listening
    /// yet, no matching tunnel yet, DNS not propagated yet) are retried;
    /// structural failures abort immediately. When the budget runs out the
    /// returned [`ResolveError::Timeout`] carries the last transient error.
    ///
    /// `cancel` aborts the sleep, request or lookup in progress and
    /// surfaces as [`ResolveError::Cancelled`].
    pub async fn resolve(
        &self,
        status_url: &str,
        protocol: TunnelProtocol,
        cancel: &CancellationToken,
    ) -> Result<ConnectionEndpoint, ResolveError> {
        let mut last_err = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }

            match self.attempt(status_url, protocol, cancel).await {
                Ok(endpoint) => {
                    info!(
                        "Resolved {} tunnel to {} on attempt {}/{}",
                        protocol, endpoint, attempt, self.max_attempts
                    );
                    return Ok(endpoint);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    debug!("Attempt {}/{} failed: {}", attempt, self.max_attempts, err);
                    last_err = Some(err);
                }
            }
        }

        Err(ResolveError::Timeout {
            attempts: self.max_attempts,
            last: Box::new(last_err.unwrap_or(ResolveError::NoMatchingTunnel {
                protocol,
                available: 0,
            })),
        })
    }

    /// One fetch/select/parse/resolve pass
    async fn attempt(
        &self,
        status_url: &str,
        protocol: TunnelProtocol,
        cancel: &CancellationToken,
    ) -> Result<ConnectionEndpoint, ResolveError> {
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
            body = self.fetch_status(status_url) => body?,
        };

        let descriptors = parse_descriptors(&body)
            .map_err(|reason| ResolveError::MalformedStatus { reason })?;

        let descriptor = descriptors
            .iter()
            .find(|d| d.protocol == protocol)
            .ok_or(ResolveError::NoMatchingTunnel {
                protocol,
                available: descriptors.len(),
            })?;

        let (host, port) = public_host_port(descriptor)?;
        let address = self.resolve_address(&host, cancel).await?;

        Ok(ConnectionEndpoint {
            host: address,
            port,
        })
    }

    async fn fetch_status(&self, status_url: &str) -> Result<Vec<u8>, ResolveError> {
        let unreachable = |reason: String| ResolveError::AgentUnreachable {
            url: status_url.to_string(),
            reason,
        };

        let response = self
            .http
            .get(status_url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unreachable(format!("HTTP {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        Ok(body.to_vec())
    }

    /// Numeric literals are used directly; hostnames go through the
    /// resolver seam.
    async fn resolve_address(
        &self,
        host: &str,
        cancel: &CancellationToken,
    ) -> Result<IpAddr, ResolveError> {
        if let Ok(address) = host.parse::<IpAddr>() {
            return Ok(address);
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(ResolveError::Cancelled),
            resolved = self.lookup_last(host) => resolved,
        }
    }

    async fn lookup_last(&self, host: &str) -> Result<IpAddr, ResolveError> {
        let failed = |reason: String| ResolveError::ResolutionFailed {
            host: host.to_string(),
            reason,
        };

        let addresses = self
            .resolver
            .lookup(host)
            .await
            .map_err(|e| failed(e.to_string()))?;

        // Tie-break on multi-address answers: always the last entry of the
        // resolver-ordered list.
        addresses
            .last()
            .copied()
            .ok_or_else(|| failed("lookup returned no addresses".to_string()))
    }
}

impl Default for EndpointResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a descriptor's public URL into host and port, defaulting the port
/// by protocol when the URL omits it.
fn public_host_port(descriptor: &TunnelDescriptor) -> Result<(String, u16), ResolveError> {
    let raw = descriptor.public_url.as_str();
    let malformed = || ResolveError::MalformedUrl {
        url: raw.to_string(),
    };

    let url = url::Url::parse(raw).map_err(|_| malformed())?;

    // IPv6 hosts are reported in bracketed URL form
    let host = url
        .host_str()
        .ok_or_else(|| malformed())?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    if host.is_empty() {
        return Err(malformed());
    }

    let port = url
        .port()
        .or_else(|| descriptor.protocol.default_port())
        .ok_or(ResolveError::MissingPort {
            url: raw.to_string(),
            protocol: descriptor.protocol,
        })?;
    if port == 0 {
        return Err(malformed());
    }

    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::MockHostResolver;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn descriptor(public_url: &str, protocol: TunnelProtocol) -> TunnelDescriptor {
        TunnelDescriptor {
            public_url: public_url.to_string(),
            protocol,
            local_addr: None,
        }
    }

    #[test]
    fn test_explicit_port_wins() {
        let (host, port) =
            public_host_port(&descriptor("tcp://relay.example.net:10022", TunnelProtocol::Tcp))
                .unwrap();
        assert_eq!(host, "relay.example.net");
        assert_eq!(port, 10022);

        let (_, port) =
            public_host_port(&descriptor("https://abc.example.net:8443", TunnelProtocol::Https))
                .unwrap();
        assert_eq!(port, 8443);
    }

    #[test]
    fn test_port_defaults_by_protocol() {
        let (_, port) =
            public_host_port(&descriptor("https://abc.example.net", TunnelProtocol::Https))
                .unwrap();
        assert_eq!(port, 443);

        let (_, port) =
            public_host_port(&descriptor("tls://abc.example.net", TunnelProtocol::Tls)).unwrap();
        assert_eq!(port, 443);

        let (_, port) =
            public_host_port(&descriptor("http://abc.example.net", TunnelProtocol::Http)).unwrap();
        assert_eq!(port, 80);
    }

    #[test]
    fn test_tcp_requires_explicit_port() {
        let err = public_host_port(&descriptor("tcp://relay.example.net", TunnelProtocol::Tcp))
            .unwrap_err();
        assert!(matches!(err, ResolveError::MissingPort { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_malformed_urls() {
        for url in ["not a url", "tcp://:10022", "http://"] {
            let err = public_host_port(&descriptor(url, TunnelProtocol::Tcp)).unwrap_err();
            assert!(matches!(err, ResolveError::MalformedUrl { .. }), "{}", url);
            assert!(err.is_fatal());
        }
    }

    #[test]
    fn test_port_zero_is_malformed() {
        let err = public_host_port(&descriptor("tcp://relay.example.net:0", TunnelProtocol::Tcp))
            .unwrap_err();
        assert!(matches!(err, ResolveError::MalformedUrl { .. }));
    }

    #[test]
    fn test_bracketed_ipv6_host() {
        let (host, port) =
            public_host_port(&descriptor("tcp://[2001:db8::1]:10022", TunnelProtocol::Tcp))
                .unwrap();
        assert_eq!(host, "2001:db8::1");
        assert_eq!(port, 10022);
        assert!(host.parse::<IpAddr>().is_ok());
    }

    #[tokio::test]
    async fn test_ip_literal_skips_lookup() {
        let mut dns = MockHostResolver::new();
        dns.expect_lookup().times(0);

        let resolver = EndpointResolver::new().with_host_resolver(Arc::new(dns));
        let cancel = CancellationToken::new();

        let address = resolver
            .resolve_address("203.0.113.7", &cancel)
            .await
            .unwrap();
        assert_eq!(address, IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)));

        let address = resolver
            .resolve_address("2001:db8::1", &cancel)
            .await
            .unwrap();
        assert_eq!(
            address,
            IpAddr::V6("2001:db8::1".parse::<Ipv6Addr>().unwrap())
        );
    }

    #[tokio::test]
    async fn test_multi_address_lookup_picks_last() {
        let mut dns = MockHostResolver::new();
        dns.expect_lookup().times(2).returning(|_| {
            Ok(vec![
                "1.1.1.1".parse().unwrap(),
                "2.2.2.2".parse().unwrap(),
                "3.3.3.3".parse().unwrap(),
            ])
        });

        let resolver = EndpointResolver::new().with_host_resolver(Arc::new(dns));
        let cancel = CancellationToken::new();

        // Deterministic across repeated calls
        for _ in 0..2 {
            let address = resolver
                .resolve_address("relay.example.net", &cancel)
                .await
                .unwrap();
            assert_eq!(address, "3.3.3.3".parse::<IpAddr>().unwrap());
        }
    }

    #[tokio::test]
    async fn test_empty_lookup_fails_resolution() {
        let mut dns = MockHostResolver::new();
        dns.expect_lookup().returning(|_| Ok(vec![]));

        let resolver = EndpointResolver::new().with_host_resolver(Arc::new(dns));
        let err = resolver
            .resolve_address("relay.example.net", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ResolveError::ResolutionFailed { .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_lookup_error_fails_resolution() {
        let mut dns = MockHostResolver::new();
        dns.expect_lookup().returning(|_| {
            Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "lookup timed out",
            ))
        });

        let resolver = EndpointResolver::new().with_host_resolver(Arc::new(dns));
        let err = resolver
            .resolve_address("relay.example.net", &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ResolveError::ResolutionFailed { host, reason } => {
                assert_eq!(host, "relay.example.net");
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_endpoint_display() {
        let v4 = ConnectionEndpoint {
            host: "203.0.113.7".parse().unwrap(),
            port: 10022,
        };
        assert_eq!(v4.to_string(), "203.0.113.7:10022");

        let v6 = ConnectionEndpoint {
            host: "2001:db8::1".parse().unwrap(),
            port: 22,
        };
        assert_eq!(v6.to_string(), "[2001:db8::1]:22");
    }
}
