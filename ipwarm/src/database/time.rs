//! Timestamp helpers for the database layer.
//!
//! Timestamps are stored as `INTEGER` Unix epoch milliseconds (UTC). Warmup log
//! dates are stored as `YYYY-MM-DD` text in UTC.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

/// Current time as Unix epoch milliseconds (UTC).
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a `DateTime<Utc>` to Unix epoch milliseconds.
#[inline]
pub fn datetime_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Convert Unix epoch milliseconds to `DateTime<Utc>`.
///
/// Values outside chrono's supported range clamp to the nearest representable timestamp.
#[inline]
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    match Utc.timestamp_millis_opt(ms) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(dt, _) => dt,
        chrono::LocalResult::None => {
            if ms.is_negative() {
                DateTime::<Utc>::MIN_UTC
            } else {
                DateTime::<Utc>::MAX_UTC
            }
        }
    }
}

/// Warmup log key for the calendar day containing `dt`.
#[inline]
pub fn date_key(dt: DateTime<Utc>) -> String {
    dt.date_naive().format("%Y-%m-%d").to_string()
}

/// Parse a `YYYY-MM-DD` warmup log key.
pub fn parse_date_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, "%Y-%m-%d").ok()
}
