//! DNS hygiene and DNSBL monitoring.

pub mod checker;
pub mod monitor;
pub mod resolver;

pub use checker::{
    BlacklistCheckResult, DNS_QUERY_TIMEOUT, DNSBL_ZONES, DnsCheckResult, DnsHealthChecker,
    HealthCheckSummary,
};
pub use monitor::{BlacklistMonitor, BlacklistMonitorConfig};
pub use resolver::{DnsError, DnsResolver, TrustDnsResolver};
