//! Operator-driven IP lifecycle changes.

use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::database::models::{IpStatus, SendingIpDbModel};
use crate::database::repositories::SendingIpRepository;
use crate::{Error, Result};

pub struct IpLifecycle {
    ips: Arc<dyn SendingIpRepository>,
}

impl IpLifecycle {
    pub fn new(ips: Arc<dyn SendingIpRepository>) -> Self {
        Self { ips }
    }

    /// Register a new IP; it starts warmup on day 1 immediately.
    pub async fn provision(&self, ip_address: &str, hostname: &str) -> Result<SendingIpDbModel> {
        let addr: Ipv4Addr = ip_address
            .trim()
            .parse()
            .map_err(|_| Error::validation(format!("not an IPv4 address: {ip_address}")))?;
        let hostname = hostname.trim().trim_end_matches('.');
        if hostname.is_empty() {
            return Err(Error::validation("hostname must not be empty"));
        }

        let ip = SendingIpDbModel::new(addr.to_string(), hostname.to_ascii_lowercase());
        self.ips.create_ip(&ip).await?;
        info!(ip = %ip.ip_address, hostname = %ip.hostname, "Provisioned sending IP");
        Ok(ip)
    }

    pub async fn pause(&self, ip_address: &str) -> Result<SendingIpDbModel> {
        self.transition(ip_address, IpStatus::Paused).await
    }

    /// Put a paused IP back into warmup on the day it left off.
    pub async fn resume(&self, ip_address: &str) -> Result<SendingIpDbModel> {
        let ip = self.ips.get_ip_by_address(ip_address).await?;
        if ip.status() != Some(IpStatus::Paused) {
            return Err(Error::invalid_transition(&ip.status, IpStatus::Warmup.as_str()));
        }
        self.transition(ip_address, IpStatus::Warmup).await
    }

    pub async fn retire(&self, ip_address: &str) -> Result<SendingIpDbModel> {
        self.transition(ip_address, IpStatus::Retired).await
    }

    async fn transition(&self, ip_address: &str, target: IpStatus) -> Result<SendingIpDbModel> {
        let ip = self.ips.get_ip_by_address(ip_address).await?;
        let current = IpStatus::parse(&ip.status)
            .ok_or_else(|| Error::invalid_transition(&ip.status, target.as_str()))?;

        if !current.can_transition_to(target) {
            return Err(Error::invalid_transition(current.as_str(), target.as_str()));
        }

        // Lost a race with a scheduler write.
        if !self.ips.update_status(&ip.id, current, target, Utc::now()).await? {
            return Err(Error::invalid_transition(current.as_str(), target.as_str()));
        }

        info!(ip = %ip.ip_address, from = %current, to = %target, "IP status changed");
        self.ips.get_ip(&ip.id).await
    }
}
