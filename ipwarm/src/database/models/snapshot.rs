//! MTA snapshot database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Summary of one collector cycle.
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize)]
pub struct MtaSnapshotDbModel {
    pub id: i64,
    /// Unix epoch milliseconds (UTC).
    pub collected_at: i64,
    pub mta_version: Option<String>,
    pub mta_uptime: Option<String>,
    pub queued_recipients: Option<i64>,
    pub queued_domains: Option<i64>,
    pub vmta_count: Option<i64>,
    pub domain_count: Option<i64>,
    pub accounting_records: i64,
    /// JSON object with per-IP and per-domain health.
    pub details: String,
}
