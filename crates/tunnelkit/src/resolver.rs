//! Endpoint resolution
//!
//! Peers may name their endpoint by hostname. Before the backend can use it,
//! every hostname has to be bound to a concrete address. Resolution is per
//! peer: one failing hostname never stops its siblings from resolving.

use crate::endpoint::{Endpoint, Host};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::{debug, warn};

/// A hostname that could not be resolved
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("DNS resolution failed for {address}")]
pub struct DnsResolutionError {
    /// The hostname as configured
    pub address: String,
}

impl DnsResolutionError {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

/// A successful resolution: the configured endpoint and its address-bound form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub original: Endpoint,
    pub resolved: Endpoint,
}

/// Per-peer resolution outcome
pub type ResolutionResult = std::result::Result<ResolvedEndpoint, DnsResolutionError>;

/// Hostname lookup backend
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Look up every address for `host`, paired with `port`.
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Resolves through the host's configured resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolve for SystemResolver {
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((host, port)).await?.collect())
    }
}

/// Pick the first IPv4 result, falling back to the first IPv6 result.
fn first_usable(addrs: &[SocketAddr]) -> Option<SocketAddr> {
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.iter().find(|a| a.is_ipv6()))
        .copied()
}

/// Binds endpoint hostnames to concrete addresses
#[derive(Debug, Clone, Default)]
pub struct EndpointResolver<R = SystemResolver> {
    resolver: R,
}

impl EndpointResolver<SystemResolver> {
    pub fn system() -> Self {
        Self::new(SystemResolver)
    }
}

impl<R: Resolve> EndpointResolver<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    /// Resolve one endpoint.
    ///
    /// Endpoints that already carry an address come back unchanged without a
    /// lookup. Hostnames are replaced by the first usable address; the port is
    /// kept.
    pub async fn resolve(&self, endpoint: &Endpoint) -> Result<Endpoint, DnsResolutionError> {
        let name = match &endpoint.host {
            Host::Name(name) => name,
            Host::Ipv4(_) | Host::Ipv6(_) => return Ok(endpoint.clone()),
        };

        match self.resolver.lookup(name, endpoint.port).await {
            Ok(addrs) => match first_usable(&addrs) {
                Some(addr) => {
                    debug!(hostname = %name, resolved = %addr.ip(), "Resolved endpoint");
                    Ok(Endpoint::new(Host::from(addr.ip()), endpoint.port))
                }
                None => {
                    warn!(hostname = %name, "DNS lookup returned no addresses");
                    Err(DnsResolutionError::new(name.clone()))
                }
            },
            Err(e) => {
                warn!(hostname = %name, error = %e, "DNS lookup failed");
                Err(DnsResolutionError::new(name.clone()))
            }
        }
    }

    /// Resolve every slot concurrently. Outcome `i` always belongs to slot `i`;
    /// empty slots stay empty.
    pub async fn resolve_all(&self, endpoints: &[Option<Endpoint>]) -> Vec<Option<ResolutionResult>> {
        join_all(endpoints.iter().map(|slot| async move {
            match slot {
                Some(endpoint) => Some(self.resolve(endpoint).await.map(|resolved| {
                    ResolvedEndpoint {
                        original: endpoint.clone(),
                        resolved,
                    }
                })),
                None => None,
            }
        }))
        .await
    }
}

/// Re-validate an endpoint that is supposed to be resolved already.
///
/// No lookup is performed: a concrete address succeeds as-is and a leftover
/// hostname is reported as a resolution failure for that peer.
pub fn reresolve(endpoint: &Endpoint) -> ResolutionResult {
    match &endpoint.host {
        Host::Name(name) => Err(DnsResolutionError::new(name.clone())),
        Host::Ipv4(_) | Host::Ipv6(_) => Ok(ResolvedEndpoint {
            original: endpoint.clone(),
            resolved: endpoint.clone(),
        }),
    }
}

/// Every failure in a batch of outcomes, in peer order.
pub fn resolution_failures(outcomes: &[Option<ResolutionResult>]) -> Vec<DnsResolutionError> {
    outcomes
        .iter()
        .flatten()
        .filter_map(|outcome| outcome.as_ref().err().cloned())
        .collect()
}

/// The resolved endpoint for each slot; failed or empty slots become `None`.
pub fn resolved_endpoints(outcomes: &[Option<ResolutionResult>]) -> Vec<Option<Endpoint>> {
    outcomes
        .iter()
        .map(|outcome| match outcome {
            Some(Ok(r)) => Some(r.resolved.clone()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Table-driven resolver that counts lookups.
    #[derive(Default, Clone)]
    pub(crate) struct StaticResolver {
        pub(crate) table: HashMap<String, Vec<std::net::IpAddr>>,
        pub(crate) lookups: Arc<AtomicUsize>,
    }

    impl StaticResolver {
        pub(crate) fn with(mut self, host: &str, ips: &[&str]) -> Self {
            self.table.insert(
                host.to_string(),
                ips.iter().map(|ip| ip.parse().unwrap()).collect(),
            );
            self
        }
    }

    #[async_trait]
    impl Resolve for StaticResolver {
        async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.table
                .get(host)
                .map(|ips| ips.iter().map(|ip| SocketAddr::new(*ip, port)).collect())
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such host"))
        }
    }

    #[tokio::test]
    async fn test_resolved_endpoint_is_idempotent() {
        let stub = StaticResolver::default();
        let lookups = Arc::clone(&stub.lookups);
        let resolver = EndpointResolver::new(stub);

        let endpoint: Endpoint = "10.0.0.1:51820".parse().unwrap();
        let first = resolver.resolve(&endpoint).await.unwrap();
        let second = resolver.resolve(&first).await.unwrap();

        assert_eq!(first, endpoint);
        assert_eq!(second, endpoint);
        assert_eq!(lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hostname_prefers_ipv4() {
        let resolver = EndpointResolver::new(
            StaticResolver::default().with("vpn.example.com", &["2001:db8::1", "203.0.113.7"]),
        );
        let endpoint: Endpoint = "vpn.example.com:443".parse().unwrap();
        let resolved = resolver.resolve(&endpoint).await.unwrap();
        assert_eq!(resolved.to_string(), "203.0.113.7:443");
    }

    #[tokio::test]
    async fn test_hostname_falls_back_to_ipv6() {
        let resolver =
            EndpointResolver::new(StaticResolver::default().with("v6.example.com", &["2001:db8::9"]));
        let endpoint: Endpoint = "v6.example.com:51820".parse().unwrap();
        let resolved = resolver.resolve(&endpoint).await.unwrap();
        assert_eq!(resolved.to_string(), "[2001:db8::9]:51820");
    }

    #[tokio::test]
    async fn test_failure_carries_hostname() {
        let resolver = EndpointResolver::new(StaticResolver::default());
        let endpoint: Endpoint = "missing.example.com:51820".parse().unwrap();
        let err = resolver.resolve(&endpoint).await.unwrap_err();
        assert_eq!(err.address, "missing.example.com");
    }

    #[tokio::test]
    async fn test_empty_answer_is_failure() {
        let resolver = EndpointResolver::new(StaticResolver::default().with("empty.example.com", &[]));
        let endpoint: Endpoint = "empty.example.com:1".parse().unwrap();
        assert!(resolver.resolve(&endpoint).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_all_isolates_failures_and_keeps_order() {
        let resolver =
            EndpointResolver::new(StaticResolver::default().with("good.example.com", &["198.51.100.1"]));
        let slots = vec![
            Some("bad.example.com:1".parse().unwrap()),
            None,
            Some("good.example.com:2".parse().unwrap()),
            Some("192.0.2.1:3".parse().unwrap()),
        ];

        let outcomes = resolver.resolve_all(&slots).await;
        assert_eq!(outcomes.len(), 4);
        assert!(matches!(outcomes[0], Some(Err(_))));
        assert!(outcomes[1].is_none());
        assert_eq!(
            outcomes[2].as_ref().unwrap().as_ref().unwrap().resolved.to_string(),
            "198.51.100.1:2"
        );
        assert!(matches!(outcomes[3], Some(Ok(_))));

        let failures = resolution_failures(&outcomes);
        assert_eq!(failures, vec![DnsResolutionError::new("bad.example.com")]);

        let endpoints = resolved_endpoints(&outcomes);
        assert_eq!(endpoints[0], None);
        assert_eq!(endpoints[1], None);
        assert!(endpoints[2].as_ref().unwrap().is_resolved());
    }

    #[test]
    fn test_reresolve() {
        let ip: Endpoint = "[2001:db8::1]:51820".parse().unwrap();
        let outcome = reresolve(&ip).unwrap();
        assert_eq!(outcome.original, outcome.resolved);

        let name: Endpoint = "vpn.example.com:51820".parse().unwrap();
        assert_eq!(
            reresolve(&name).unwrap_err(),
            DnsResolutionError::new("vpn.example.com")
        );
    }
}
