//! Warmup log database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row per (IP, UTC calendar day).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WarmupLogDbModel {
    pub id: i64,
    pub ip_id: String,
    /// `YYYY-MM-DD`
    pub date: String,
    pub planned_volume: i64,
    pub warmup_day: i64,
    pub status: String,
    pub actual_sent: i64,
    pub actual_bounced: i64,
    pub actual_complained: i64,
    /// Threshold breach reason when `status = failed`.
    pub notes: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl WarmupLogDbModel {
    pub fn status(&self) -> Option<WarmupLogStatus> {
        WarmupLogStatus::parse(&self.status)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WarmupLogStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl WarmupLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Completed and failed days are never reopened.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Per-IP delivery counts to add to a warmup log row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmupActuals {
    pub sent: i64,
    pub bounced: i64,
    pub complained: i64,
}

impl WarmupActuals {
    pub fn is_empty(&self) -> bool {
        self.sent == 0 && self.bounced == 0 && self.complained == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_status_strings() {
        assert_eq!(WarmupLogStatus::InProgress.as_str(), "in_progress");
        assert_eq!(WarmupLogStatus::InProgress.to_string(), "in_progress");
        assert_eq!(
            WarmupLogStatus::parse("failed"),
            Some(WarmupLogStatus::Failed)
        );
        assert_eq!(WarmupLogStatus::parse("done"), None);
    }

    #[test]
    fn test_final_states() {
        assert!(WarmupLogStatus::Completed.is_final());
        assert!(WarmupLogStatus::Failed.is_final());
        assert!(!WarmupLogStatus::Pending.is_final());
        assert!(!WarmupLogStatus::InProgress.is_final());
    }
}
