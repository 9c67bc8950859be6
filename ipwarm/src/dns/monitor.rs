//! Periodic fleet-wide DNS and blacklist checks.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::Result;
use crate::database::models::IpStatus;
use crate::database::repositories::SendingIpRepository;
use crate::dns::checker::{DnsHealthChecker, HealthCheckSummary};

/// Configuration for the blacklist monitor.
#[derive(Debug, Clone)]
pub struct BlacklistMonitorConfig {
    /// Delay before the first run (default: 1 minute).
    pub initial_delay: Duration,
    /// Interval between runs (default: 24 hours).
    pub interval: Duration,
    /// Upper bound for one run (default: 10 minutes).
    pub run_timeout: Duration,
}

impl Default for BlacklistMonitorConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(60),
            interval: Duration::from_secs(24 * 60 * 60),
            run_timeout: Duration::from_secs(10 * 60),
        }
    }
}

pub struct BlacklistMonitor {
    checker: Arc<DnsHealthChecker>,
    ips: Arc<dyn SendingIpRepository>,
    config: BlacklistMonitorConfig,
    cancellation_token: CancellationToken,
}

impl BlacklistMonitor {
    pub fn new(
        checker: Arc<DnsHealthChecker>,
        ips: Arc<dyn SendingIpRepository>,
        config: BlacklistMonitorConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            checker,
            ips,
            config,
            cancellation_token,
        }
    }

    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Blacklist monitor started (initial delay: {}s, interval: {}s)",
                self.config.initial_delay.as_secs(),
                self.config.interval.as_secs()
            );

            let mut wait = self.config.initial_delay;
            loop {
                tokio::select! {
                    _ = self.cancellation_token.cancelled() => {
                        info!("Blacklist monitor shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(wait) => {
                        self.run_once().await;
                        wait = self.config.interval;
                    }
                }
            }
        })
    }

    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }

    /// One bounded health-check run; alerts on blacklisted IPs when issues were found.
    pub async fn run_once(&self) -> Option<HealthCheckSummary> {
        let run = self.checker.run_health_checks(&self.cancellation_token);
        let summary = match tokio::time::timeout(self.config.run_timeout, run).await {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => {
                error!(error = %e, "Health check run failed");
                return None;
            }
            Err(_) => {
                error!(
                    "Health check run exceeded {}s; abandoned",
                    self.config.run_timeout.as_secs()
                );
                return None;
            }
        };

        if summary.issues > 0 {
            if let Err(e) = self.report_blacklisted().await {
                error!(error = %e, "Failed to list blacklisted IPs");
            }
        }
        Some(summary)
    }

    /// Log every blacklisted IP with its zones. Returns how many were reported.
    pub async fn report_blacklisted(&self) -> Result<usize> {
        let listed = self.ips.list_ips_by_status(IpStatus::Blacklisted).await?;
        for ip in &listed {
            let zones: Vec<String> = ip.blacklists().into_iter().collect();
            warn!(
                ip = %ip.ip_address,
                hostname = %ip.hostname,
                zones = %zones.join(","),
                "ALERT: sending IP is blacklisted"
            );
        }
        Ok(listed.len())
    }
}
