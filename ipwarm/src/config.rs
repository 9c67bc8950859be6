//! Environment-driven application configuration.
//!
//! `.env` is loaded by the binary before [`AppConfig::from_env`] runs.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use pmta_api::PmtaClientConfig;

use crate::collector::CollectorConfig;
use crate::dns::BlacklistMonitorConfig;
use crate::warmup::{RecipientThresholds, Thresholds, WarmupConfig};
use crate::{Error, Result};

/// Default primary database URL.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:ipwarm.db?mode=rwc";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Read replica holding the subscribers table; the primary is used when unset.
    pub subscriber_database_url: Option<String>,
    /// Management API; `None` disables API polling.
    pub pmta: Option<PmtaClientConfig>,
    pub warmup: WarmupConfig,
    pub blacklist: BlacklistMonitorConfig,
    pub collector: CollectorConfig,
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            subscriber_database_url: None,
            pmta: None,
            warmup: WarmupConfig::default(),
            blacklist: BlacklistMonitorConfig::default(),
            collector: CollectorConfig::default(),
            log_dir: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let warmup = WarmupConfig {
            tick_interval: secs(&get, "WARMUP_TICK_INTERVAL_SECS", defaults.warmup.tick_interval)?,
            thresholds: Thresholds {
                max_bounce_rate: rate(
                    &get,
                    "WARMUP_MAX_BOUNCE_RATE",
                    defaults.warmup.thresholds.max_bounce_rate,
                )?,
                max_complaint_rate: rate(
                    &get,
                    "WARMUP_MAX_COMPLAINT_RATE",
                    defaults.warmup.thresholds.max_complaint_rate,
                )?,
                min_sent: parse(&get, "WARMUP_MIN_SENT", defaults.warmup.thresholds.min_sent)?,
            },
            recipients: RecipientThresholds {
                seed: rate(&get, "WARMUP_SEED_THRESHOLD", defaults.warmup.recipients.seed)?,
                validate: rate(
                    &get,
                    "WARMUP_VALIDATE_THRESHOLD",
                    defaults.warmup.recipients.validate,
                )?,
                expand: rate(&get, "WARMUP_EXPAND_THRESHOLD", defaults.warmup.recipients.expand)?,
            },
        };

        let blacklist = BlacklistMonitorConfig {
            initial_delay: secs(
                &get,
                "BLACKLIST_INITIAL_DELAY_SECS",
                defaults.blacklist.initial_delay,
            )?,
            interval: secs(
                &get,
                "BLACKLIST_CHECK_INTERVAL_SECS",
                defaults.blacklist.interval,
            )?,
            ..defaults.blacklist
        };

        let collector = CollectorConfig {
            interval: secs(&get, "COLLECTOR_INTERVAL_SECS", defaults.collector.interval)?,
            accounting_path: get("PMTA_ACCOUNTING_PATH").map(PathBuf::from),
            max_read_bytes: positive(
                &get,
                "COLLECTOR_MAX_READ_BYTES",
                defaults.collector.max_read_bytes,
            )?,
        };

        let pmta = get("PMTA_API_URL").map(|base_url| PmtaClientConfig {
            base_url,
            ..Default::default()
        });

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            subscriber_database_url: get("SUBSCRIBER_DATABASE_URL"),
            pmta,
            warmup,
            blacklist,
            collector,
            log_dir: get("LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| Error::config(format!("{key}={raw:?}: {e}"))),
        None => Ok(default),
    }
}

fn positive<G>(get: &G, key: &str, default: u64) -> Result<u64>
where
    G: Fn(&str) -> Option<String>,
{
    let value: u64 = parse(get, key, default)?;
    if value == 0 {
        return Err(Error::config(format!("{key} must be greater than zero")));
    }
    Ok(value)
}

/// Positive number of seconds.
fn secs<G>(get: &G, key: &str, default: Duration) -> Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    positive(get, key, default.as_secs()).map(Duration::from_secs)
}

/// Fraction in `[0, 1]`.
fn rate<G>(get: &G, key: &str, default: f64) -> Result<f64>
where
    G: Fn(&str) -> Option<String>,
{
    let value: f64 = parse(get, key, default)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::config(format!("{key} must be between 0 and 1, got {value}")));
    }
    Ok(value)
}
