//! DNS resolution port.
//!
//! The checker only needs PTR and address lookups; the trait keeps the
//! resolver swappable in tests.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DnsError {
    #[error("no records for {0}")]
    NotFound(String),
    #[error("lookup for {0} timed out")]
    Timeout(String),
    #[error("lookup for {name} failed: {message}")]
    Lookup { name: String, message: String },
}

impl DnsError {
    fn from_resolve(name: impl Into<String>, err: &ResolveError) -> Self {
        let name = name.into();
        match err.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => Self::NotFound(name),
            ResolveErrorKind::Timeout => Self::Timeout(name),
            _ => Self::Lookup {
                name,
                message: err.to_string(),
            },
        }
    }
}

#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// PTR names for `ip`, as returned (may carry a trailing dot).
    async fn reverse_lookup(&self, ip: IpAddr) -> Result<Vec<String>, DnsError>;

    /// A/AAAA addresses for `name`.
    async fn lookup_ip(&self, name: &str) -> Result<Vec<IpAddr>, DnsError>;
}

/// Resolver backed by `trust-dns-resolver` on the tokio runtime.
pub struct TrustDnsResolver {
    inner: TokioAsyncResolver,
}

impl TrustDnsResolver {
    /// Use the system resolver configuration, falling back to the library
    /// defaults when it cannot be read.
    pub fn new(timeout: Duration) -> Self {
        let (config, mut opts) = match trust_dns_resolver::system_conf::read_system_conf() {
            Ok(conf) => conf,
            Err(e) => {
                warn!(error = %e, "Could not read system resolver config; using defaults");
                (ResolverConfig::default(), ResolverOpts::default())
            }
        };
        opts.timeout = timeout;
        opts.attempts = 1;
        // DNSBL answers change; don't serve stale listings from cache.
        opts.cache_size = 0;

        Self {
            inner: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

#[async_trait]
impl DnsResolver for TrustDnsResolver {
    async fn reverse_lookup(&self, ip: IpAddr) -> Result<Vec<String>, DnsError> {
        let lookup = self
            .inner
            .reverse_lookup(ip)
            .await
            .map_err(|e| DnsError::from_resolve(ip.to_string(), &e))?;
        Ok(lookup.iter().map(|name| name.to_string()).collect())
    }

    async fn lookup_ip(&self, name: &str) -> Result<Vec<IpAddr>, DnsError> {
        let lookup = self
            .inner
            .lookup_ip(name)
            .await
            .map_err(|e| DnsError::from_resolve(name, &e))?;
        Ok(lookup.iter().collect())
    }
}
