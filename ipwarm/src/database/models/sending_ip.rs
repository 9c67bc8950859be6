//! Sending IP database model.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{ms_to_datetime, now_ms};
use crate::utils::json::{self, JsonContext};
use crate::warmup::schedule::{WarmupStage, volume_for_day};

/// One physical sending address in the fleet.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SendingIpDbModel {
    pub id: String,
    pub ip_address: String,
    /// Expected PTR name for `ip_address`.
    pub hostname: String,
    /// Lifecycle state (warmup, active, paused, ...)
    pub status: String,
    pub warmup_day: i64,
    /// Schedule cap for `warmup_day`.
    pub warmup_daily_limit: i64,
    pub warmup_stage: String,
    /// Unix epoch milliseconds (UTC) when warmup began.
    pub warmup_started_at: Option<i64>,
    pub total_sent: i64,
    pub total_delivered: i64,
    pub total_bounced: i64,
    pub total_complained: i64,
    /// JSON array of DNSBL zones the IP was last found on.
    pub blacklisted_on: String,
    pub rdns_verified: bool,
    /// Unix epoch milliseconds (UTC).
    pub rdns_last_checked: Option<i64>,
    /// Unix epoch milliseconds (UTC).
    pub last_blacklist_check: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SendingIpDbModel {
    /// A freshly provisioned IP on warmup day 1.
    pub fn new(ip_address: impl Into<String>, hostname: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ip_address: ip_address.into(),
            hostname: hostname.into(),
            status: IpStatus::Warmup.as_str().to_string(),
            warmup_day: 1,
            warmup_daily_limit: volume_for_day(1),
            warmup_stage: WarmupStage::Day1.as_str().to_string(),
            warmup_started_at: Some(now),
            total_sent: 0,
            total_delivered: 0,
            total_bounced: 0,
            total_complained: 0,
            blacklisted_on: "[]".to_string(),
            rdns_verified: false,
            rdns_last_checked: None,
            last_blacklist_check: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> Option<IpStatus> {
        IpStatus::parse(&self.status)
    }

    /// Decoded `blacklisted_on`. Malformed JSON is logged and read as empty.
    pub fn blacklists(&self) -> BTreeSet<String> {
        json::parse_or_default(
            &self.blacklisted_on,
            JsonContext::IpField {
                ip: &self.ip_address,
                field: "blacklisted_on",
            },
            "Invalid blacklist JSON; treating as empty",
        )
    }

    pub fn warmup_started(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.warmup_started_at.map(ms_to_datetime)
    }
}

/// Sending IP lifecycle states.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IpStatus {
    /// Ramping through the volume schedule.
    Warmup,
    /// Graduated; sending at full volume.
    Active,
    /// Sending stopped after a threshold breach or by an operator.
    Paused,
    /// Held out of rotation pending investigation.
    Quarantined,
    /// Listed on at least one DNSBL.
    Blacklisted,
    /// Permanently removed from the fleet.
    Retired,
}

impl IpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warmup => "warmup",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Quarantined => "quarantined",
            Self::Blacklisted => "blacklisted",
            Self::Retired => "retired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "warmup" => Some(Self::Warmup),
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "quarantined" => Some(Self::Quarantined),
            "blacklisted" => Some(Self::Blacklisted),
            "retired" => Some(Self::Retired),
            _ => None,
        }
    }

    /// Statuses the health checks cover.
    pub fn is_monitored(&self) -> bool {
        matches!(self, Self::Active | Self::Warmup | Self::Paused)
    }

    /// Check if this status allows transitioning to `target`.
    pub fn can_transition_to(&self, target: IpStatus) -> bool {
        use IpStatus::*;
        match (self, target) {
            (Retired, _) => false,
            (_, Retired) => true,
            // Graduation and auto-pause
            (Warmup, Active | Paused) => true,
            // Manual resume restarts the ramp where it left off
            (Paused, Warmup) => true,
            (Active, Paused) => true,
            // Health-driven
            (Warmup | Active | Paused, Blacklisted | Quarantined) => true,
            // Delisted or cleared IPs re-enter warmup
            (Blacklisted | Quarantined, Warmup) => true,
            (Blacklisted, Quarantined) => true,
            _ => false,
        }
    }
}
