//! Accounting record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Accounting record classification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    /// `d`: delivered.
    Delivered,
    /// `b`: bounced during the SMTP transaction.
    Bounced,
    /// `rb`: remote bounce received after acceptance.
    RemoteBounced,
    /// `f`: feedback-loop complaint.
    Complaint,
    /// Any other accounting type (transient, receipt, ...).
    Other(String),
}

impl RecordType {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "d" => Self::Delivered,
            "b" => Self::Bounced,
            "rb" => Self::RemoteBounced,
            "f" => Self::Complaint,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Delivered => "d",
            Self::Bounced => "b",
            Self::RemoteBounced => "rb",
            Self::Complaint => "f",
            Self::Other(s) => s,
        }
    }

    /// Both in-transaction and remote bounces count as bounced.
    pub fn is_bounce(&self) -> bool {
        matches!(self, Self::Bounced | Self::RemoteBounced)
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed accounting line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountingRecord {
    pub record_type: RecordType,
    pub time_logged: DateTime<Utc>,
    pub orig: String,
    pub rcpt: String,
    /// Lower-cased substring after the last `@` of `rcpt`.
    pub domain: String,
    pub source_ip: String,
    pub vmta: String,
    pub job_id: String,
    /// DSN status code (`dsnStatus`).
    pub bounce_code: String,
    pub dsn_diag: String,
    pub bounce_cat: String,
    pub message_id: String,
    pub dkim_result: String,
}

impl AccountingRecord {
    /// Create a record with only the positional fields populated.
    pub fn new(
        record_type: RecordType,
        time_logged: DateTime<Utc>,
        orig: impl Into<String>,
        rcpt: impl Into<String>,
    ) -> Self {
        let rcpt = rcpt.into();
        Self {
            record_type,
            time_logged,
            orig: orig.into(),
            domain: recipient_domain(&rcpt),
            rcpt,
            source_ip: String::new(),
            vmta: String::new(),
            job_id: String::new(),
            bounce_code: String::new(),
            dsn_diag: String::new(),
            bounce_cat: String::new(),
            message_id: String::new(),
            dkim_result: String::new(),
        }
    }

    /// Set the delivering source IP.
    pub fn with_source_ip(mut self, ip: impl Into<String>) -> Self {
        self.source_ip = ip.into();
        self
    }
}

/// Domain part of a recipient address: everything after the last `@`, lower-cased.
///
/// Returns an empty string when the address has no `@`.
pub fn recipient_domain(rcpt: &str) -> String {
    rcpt.rsplit_once('@')
        .map(|(_, domain)| domain.trim().to_ascii_lowercase())
        .unwrap_or_default()
}
