//! Per-IP and per-domain health aggregation.
//!
//! Pure folds over parsed [`AccountingRecord`]s. Complaints are tracked separately
//! and never count toward `sent`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{AccountingRecord, RecordType};

/// Group key used for records without a delivering source IP.
pub const UNKNOWN_SOURCE_IP: &str = "unknown";

/// Bounce rate (percent) above which an IP is critical.
pub const CRITICAL_BOUNCE_RATE: f64 = 5.0;
/// Complaint rate (percent) above which an IP is critical.
pub const CRITICAL_COMPLAINT_RATE: f64 = 0.1;
/// Bounce rate (percent) above which an IP needs attention.
pub const WARNING_BOUNCE_RATE: f64 = 2.0;
/// Complaint rate (percent) above which an IP needs attention.
pub const WARNING_COMPLAINT_RATE: f64 = 0.05;

/// Health classification of a sending IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Warning,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Warning => write!(f, "warning"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Aggregated health for one source IP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpHealth {
    pub ip: String,
    pub total_sent: u64,
    pub delivered: u64,
    pub bounced: u64,
    pub complained: u64,
    /// Percent of sent.
    pub delivery_rate: f64,
    /// Percent of sent.
    pub bounce_rate: f64,
    /// Percent of delivered.
    pub complaint_rate: f64,
    pub status: HealthStatus,
    pub blacklists: Vec<String>,
    /// Latest `time_logged` among the folded records.
    pub last_checked: Option<DateTime<Utc>>,
}

impl IpHealth {
    fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            total_sent: 0,
            delivered: 0,
            bounced: 0,
            complained: 0,
            delivery_rate: 0.0,
            bounce_rate: 0.0,
            complaint_rate: 0.0,
            status: HealthStatus::Healthy,
            blacklists: Vec::new(),
            last_checked: None,
        }
    }

    fn record(&mut self, record: &AccountingRecord) {
        match &record.record_type {
            RecordType::Delivered => self.delivered += 1,
            t if t.is_bounce() => self.bounced += 1,
            RecordType::Complaint => self.complained += 1,
            _ => return,
        }
        if self.last_checked.is_none_or(|t| record.time_logged > t) {
            self.last_checked = Some(record.time_logged);
        }
    }

    fn finalize(&mut self) {
        self.total_sent = self.delivered + self.bounced;
        self.delivery_rate = percent(self.delivered, self.total_sent);
        self.bounce_rate = percent(self.bounced, self.total_sent);
        self.complaint_rate = percent(self.complained, self.delivered);
        self.status = classify_health(self.bounce_rate, self.complaint_rate);
    }
}

/// Delivery outcome counts for one recipient domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainStatus {
    pub domain: String,
    pub delivered: u64,
    pub bounced: u64,
    /// Percent of delivered + bounced.
    pub delivery_rate: f64,
}

/// Classify an IP from its bounce and complaint rates (both in percent).
///
/// Rules are evaluated in order and the first match wins.
pub fn classify_health(bounce_rate: f64, complaint_rate: f64) -> HealthStatus {
    if bounce_rate > CRITICAL_BOUNCE_RATE || complaint_rate > CRITICAL_COMPLAINT_RATE {
        HealthStatus::Critical
    } else if bounce_rate > WARNING_BOUNCE_RATE || complaint_rate > WARNING_COMPLAINT_RATE {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

/// Fold records into per-source-IP health.
pub fn aggregate_by_ip(records: &[AccountingRecord]) -> HashMap<String, IpHealth> {
    let mut by_ip: HashMap<String, IpHealth> = HashMap::new();

    for record in records {
        if matches!(record.record_type, RecordType::Other(_)) {
            continue;
        }
        let ip = if record.source_ip.is_empty() {
            UNKNOWN_SOURCE_IP
        } else {
            record.source_ip.as_str()
        };
        by_ip
            .entry(ip.to_string())
            .or_insert_with(|| IpHealth::new(ip))
            .record(record);
    }

    for health in by_ip.values_mut() {
        health.finalize();
    }
    by_ip
}

/// Fold records into per-recipient-domain delivery counts.
///
/// Records without a recipient domain are ignored.
pub fn aggregate_by_domain(records: &[AccountingRecord]) -> HashMap<String, DomainStatus> {
    let mut by_domain: HashMap<String, DomainStatus> = HashMap::new();

    for record in records {
        if record.domain.is_empty() {
            continue;
        }
        let is_delivery = record.record_type == RecordType::Delivered;
        if !is_delivery && !record.record_type.is_bounce() {
            continue;
        }

        let entry = by_domain
            .entry(record.domain.clone())
            .or_insert_with(|| DomainStatus {
                domain: record.domain.clone(),
                delivered: 0,
                bounced: 0,
                delivery_rate: 0.0,
            });
        if is_delivery {
            entry.delivered += 1;
        } else {
            entry.bounced += 1;
        }
    }

    for status in by_domain.values_mut() {
        status.delivery_rate = percent(status.delivered, status.delivered + status.bounced);
    }
    by_domain
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
