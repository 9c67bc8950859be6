//! Forward/reverse DNS verification and DNSBL lookups for sending IPs.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::database::repositories::SendingIpRepository;
use crate::dns::resolver::{DnsError, DnsResolver};
use crate::{Error, Result};

/// Per-query timeout for PTR, forward and DNSBL lookups.
pub const DNS_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// DNSBL zones queried for every IP.
pub const DNSBL_ZONES: [&str; 8] = [
    "zen.spamhaus.org",
    "b.barracudacentral.org",
    "bl.spamcop.net",
    "dnsbl.sorbs.net",
    "cbl.abuseat.org",
    "dnsbl-1.uceprotect.net",
    "psbl.surriel.com",
    "dyna.spamrats.com",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DnsCheckResult {
    pub ip: String,
    pub hostname: String,
    pub reverse_names: Vec<String>,
    pub forward_addrs: Vec<String>,
    /// First PTR name equals `hostname`.
    pub reverse_match: bool,
    /// `ip` is among the addresses `hostname` resolves to.
    pub forward_match: bool,
    /// Lookup failures, `; `-joined.
    pub error: Option<String>,
}

impl DnsCheckResult {
    pub fn is_verified(&self) -> bool {
        self.forward_match && self.reverse_match
    }

    /// Mismatch or lookup error.
    pub fn has_issue(&self) -> bool {
        !self.is_verified() || self.error.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BlacklistCheckResult {
    pub ip: String,
    pub listed: bool,
    /// Zones that returned a 127.x answer.
    pub blacklists: BTreeSet<String>,
    pub clean: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthCheckSummary {
    pub checked: u64,
    pub issues: u64,
}

/// Compare a PTR name with the expected hostname, ignoring case and a trailing dot.
pub fn hostnames_match(ptr: &str, hostname: &str) -> bool {
    ptr.trim_end_matches('.')
        .eq_ignore_ascii_case(hostname.trim_end_matches('.'))
}

/// `d.c.b.a` for `a.b.c.d`.
pub fn reversed_octets(ip: Ipv4Addr) -> String {
    let [a, b, c, d] = ip.octets();
    format!("{d}.{c}.{b}.{a}")
}

fn is_listing_answer(addr: &IpAddr) -> bool {
    matches!(addr, IpAddr::V4(v4) if v4.octets()[0] == 127)
}

pub struct DnsHealthChecker {
    resolver: Arc<dyn DnsResolver>,
    ips: Arc<dyn SendingIpRepository>,
    query_timeout: Duration,
}

impl DnsHealthChecker {
    pub fn new(resolver: Arc<dyn DnsResolver>, ips: Arc<dyn SendingIpRepository>) -> Self {
        Self {
            resolver,
            ips,
            query_timeout: DNS_QUERY_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    async fn timed<T, F>(&self, name: &str, lookup: F) -> std::result::Result<T, DnsError>
    where
        F: std::future::Future<Output = std::result::Result<T, DnsError>>,
    {
        match tokio::time::timeout(self.query_timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(DnsError::Timeout(name.to_string())),
        }
    }

    /// Verify PTR and forward records for `ip` and persist the outcome.
    ///
    /// Lookup failures land in `error`; only a persistence failure is returned as `Err`.
    pub async fn check_dns(&self, ip: &str, hostname: &str) -> Result<DnsCheckResult> {
        let mut result = DnsCheckResult {
            ip: ip.to_string(),
            hostname: hostname.to_string(),
            ..Default::default()
        };
        let mut errors = Vec::new();

        match ip.parse::<IpAddr>() {
            Ok(addr) => match self.timed(ip, self.resolver.reverse_lookup(addr)).await {
                Ok(names) => {
                    result.reverse_match = names
                        .first()
                        .is_some_and(|name| hostnames_match(name, hostname));
                    result.reverse_names = names;
                }
                Err(e) => errors.push(format!("reverse lookup: {e}")),
            },
            Err(_) => errors.push(format!("reverse lookup: invalid address {ip}")),
        }

        match self.timed(hostname, self.resolver.lookup_ip(hostname)).await {
            Ok(addrs) => {
                result.forward_addrs = addrs.iter().map(IpAddr::to_string).collect();
                result.forward_match = result.forward_addrs.iter().any(|a| a == ip);
            }
            Err(e) => errors.push(format!("forward lookup: {e}")),
        }

        if !errors.is_empty() {
            result.error = Some(errors.join("; "));
        }

        let known = self
            .ips
            .record_dns_check(ip, result.is_verified(), Utc::now())
            .await?;
        if !known {
            debug!(ip, "DNS check for an IP outside the fleet; not persisted");
        }

        Ok(result)
    }

    /// Query every DNSBL zone for `ip` and persist the listed set.
    pub async fn check_blacklists(&self, ip: &str) -> Result<BlacklistCheckResult> {
        let addr: Ipv4Addr = ip
            .parse()
            .map_err(|_| Error::validation(format!("DNSBL lookups need an IPv4 address: {ip}")))?;
        let reversed = reversed_octets(addr);

        let lookups = DNSBL_ZONES.iter().map(|zone| {
            let query = format!("{reversed}.{zone}.");
            async move {
                let answer = self.timed(&query, self.resolver.lookup_ip(&query)).await;
                (*zone, answer)
            }
        });

        let mut result = BlacklistCheckResult {
            ip: ip.to_string(),
            ..Default::default()
        };
        for (zone, answer) in join_all(lookups).await {
            match answer {
                Ok(addrs) if addrs.iter().any(is_listing_answer) => {
                    result.blacklists.insert(zone.to_string());
                }
                Ok(_) => {
                    result.clean.insert(zone.to_string());
                }
                Err(e) => {
                    if !matches!(e, DnsError::NotFound(_)) {
                        debug!(ip, zone, error = %e, "DNSBL lookup failed; treating as clean");
                    }
                    result.clean.insert(zone.to_string());
                }
            }
        }
        result.listed = !result.blacklists.is_empty();

        if result.listed {
            warn!(ip, zones = ?result.blacklists, "IP is listed on DNSBLs");
        }

        let known = self
            .ips
            .record_blacklist_check(ip, &result.blacklists, Utc::now())
            .await?;
        if !known {
            debug!(ip, "Blacklist check for an IP outside the fleet; not persisted");
        }

        Ok(result)
    }

    /// Check every monitored IP, least recently checked first.
    ///
    /// Failing to list the fleet is the only error returned; per-IP failures are
    /// logged and counted as issues. Cancellation is honored between IPs.
    pub async fn run_health_checks(
        &self,
        cancel: &CancellationToken,
    ) -> Result<HealthCheckSummary> {
        let ips = self.ips.list_ips_for_health_check().await?;
        let mut summary = HealthCheckSummary::default();

        for ip in ips {
            if cancel.is_cancelled() {
                info!(checked = summary.checked, "Health checks cancelled");
                break;
            }

            match self.check_dns(&ip.ip_address, &ip.hostname).await {
                Ok(dns) if dns.has_issue() => {
                    warn!(
                        ip = %ip.ip_address,
                        hostname = %ip.hostname,
                        forward_match = dns.forward_match,
                        reverse_match = dns.reverse_match,
                        error = dns.error.as_deref().unwrap_or(""),
                        "DNS verification failed"
                    );
                    summary.issues += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(ip = %ip.ip_address, error = %e, "DNS check failed");
                    summary.issues += 1;
                }
            }

            match self.check_blacklists(&ip.ip_address).await {
                Ok(bl) if bl.listed => summary.issues += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(ip = %ip.ip_address, error = %e, "Blacklist check failed");
                    summary.issues += 1;
                }
            }

            summary.checked += 1;
        }

        info!(
            checked = summary.checked,
            issues = summary.issues,
            "Health checks completed"
        );
        Ok(summary)
    }
}
