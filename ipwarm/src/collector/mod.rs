//! MTA collector: polls the management API and the accounting file, then folds
//! the new accounting records into the sending IP counters, the warmup log
//! actuals of the day each record was logged, and a per-cycle snapshot.
//!
//! The accounting read position is stored with the counters it produced, so a
//! restart continues where the previous process stopped.

pub mod cursor;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pmta_accounting::{
    AccountingRecord, DomainStatus, IpHealth, RecordType, UNKNOWN_SOURCE_IP, aggregate_by_domain,
    aggregate_by_ip,
};
use pmta_api::{DomainQueueStatus, MtaStatus, PmtaClient, QueueSummary, VmtaStatus};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::database::models::{MtaSnapshotDbModel, WarmupActuals};
use crate::database::repositories::{
    AccountingBatch, AccountingLedgerRepository, CounterDelta, CursorPosition, DatedActuals,
    MtaSnapshotRepository,
};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::{datetime_to_ms, date_key};
use crate::utils::json::{self, JsonContext};

pub use cursor::{AccountingChunk, AccountingCursor, DEFAULT_MAX_READ_BYTES};

/// Configuration for the collector.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Interval between cycles (default: 5 minutes).
    pub interval: Duration,
    /// Accounting CSV to follow, if any.
    pub accounting_path: Option<PathBuf>,
    /// Most accounting bytes consumed per cycle.
    pub max_read_bytes: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            accounting_path: None,
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
        }
    }
}

/// Everything gathered in one cycle. A failed API call leaves its field `None`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectorMetrics {
    pub collected_at: DateTime<Utc>,
    pub status: Option<MtaStatus>,
    pub queues: Option<Vec<QueueSummary>>,
    pub vmtas: Option<Vec<VmtaStatus>>,
    pub domains: Option<Vec<DomainQueueStatus>>,
    pub accounting_records: usize,
    pub ip_health: BTreeMap<String, IpHealth>,
    pub domain_health: BTreeMap<String, DomainStatus>,
}

#[derive(Serialize)]
struct SnapshotDetails<'a> {
    ip_health: &'a BTreeMap<String, IpHealth>,
    domain_health: &'a BTreeMap<String, DomainStatus>,
}

pub struct Collector {
    client: Option<PmtaClient>,
    cursor: Option<Mutex<AccountingCursor>>,
    ledger: Arc<dyn AccountingLedgerRepository>,
    snapshots: Arc<dyn MtaSnapshotRepository>,
    config: CollectorConfig,
    cancellation_token: CancellationToken,
}

impl Collector {
    pub fn new(
        client: Option<PmtaClient>,
        ledger: Arc<dyn AccountingLedgerRepository>,
        snapshots: Arc<dyn MtaSnapshotRepository>,
        config: CollectorConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        let cursor = config
            .accounting_path
            .clone()
            .map(|path| {
                Mutex::new(AccountingCursor::new(path).with_max_read_bytes(config.max_read_bytes))
            });
        Self {
            client,
            cursor,
            ledger,
            snapshots,
            config,
            cancellation_token,
        }
    }

    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!(
                "MTA collector started (interval: {}s, api: {}, accounting: {})",
                self.config.interval.as_secs(),
                self.client.is_some(),
                self.config.accounting_path.is_some()
            );

            loop {
                tokio::select! {
                    _ = self.cancellation_token.cancelled() => {
                        info!("MTA collector shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        self.collect().await;
                    }
                }
            }
        })
    }

    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }

    pub async fn collect(&self) -> CollectorMetrics {
        self.collect_at(Utc::now()).await
    }

    /// One cycle as of `now`. Never fails; every problem is logged.
    pub async fn collect_at(&self, now: DateTime<Utc>) -> CollectorMetrics {
        let mut metrics = CollectorMetrics {
            collected_at: now,
            ..Default::default()
        };

        if let Some(client) = &self.client {
            metrics.status = degrade("status", client.status().await);
            metrics.queues = degrade("queues", client.queues().await);
            metrics.vmtas = degrade("vmtas", client.vmtas().await);
            metrics.domains = degrade("domains", client.domains().await);
        }

        if let Some(cursor) = &self.cursor {
            let mut cursor = cursor.lock().await;
            if let Err(e) = self.follow_accounting(&mut cursor, &mut metrics, now).await {
                error!(
                    path = %cursor.path().display(),
                    offset = cursor.offset(),
                    error = %e,
                    "Failed to apply accounting records; retrying next cycle"
                );
            }
        }

        if let Err(e) = self.store_snapshot(&metrics).await {
            error!(error = %e, "Failed to store MTA snapshot");
        }

        debug!(
            records = metrics.accounting_records,
            ips = metrics.ip_health.len(),
            domains = metrics.domain_health.len(),
            "Collector cycle completed"
        );
        metrics
    }

    /// Read the next chunk of the accounting file and store what it adds.
    /// The cursor only moves once the ledger transaction has committed.
    async fn follow_accounting(
        &self,
        cursor: &mut AccountingCursor,
        metrics: &mut CollectorMetrics,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let path = cursor.path().to_string_lossy().into_owned();

        if !cursor.is_restored() {
            match self.ledger.get_cursor(&path).await? {
                Some(saved) => {
                    info!(path = %path, offset = saved.offset(), "Resuming accounting file");
                    cursor.restore(saved.offset(), saved.strategy());
                }
                None => cursor.restore_fresh(),
            }
        }

        let Some(chunk) = cursor.read_chunk().await? else {
            return Ok(());
        };

        let ip_health = aggregate_by_ip(&chunk.records);
        let batch = AccountingBatch {
            counters: counter_deltas(&ip_health),
            actuals: dated_actuals(&chunk.records),
            cursor: Some(CursorPosition {
                path,
                offset: chunk.end(),
                strategy: chunk.strategy().clone(),
            }),
        };
        let outcome = retry_on_sqlite_busy("apply_accounting_batch", || {
            self.ledger.apply_batch(&batch, now)
        })
        .await?;

        debug!(
            start = chunk.start(),
            end = chunk.end(),
            counted_ips = outcome.counted_ips,
            unknown_ips = outcome.unknown_ips,
            log_rows = outcome.log_rows,
            "Applied accounting batch"
        );

        metrics.accounting_records = chunk.records.len();
        metrics.ip_health = ip_health.into_iter().collect();
        metrics.domain_health = aggregate_by_domain(&chunk.records).into_iter().collect();
        cursor.commit(chunk);
        Ok(())
    }

    async fn store_snapshot(&self, metrics: &CollectorMetrics) -> Result<i64> {
        let details = json::to_string_or_fallback(
            &SnapshotDetails {
                ip_health: &metrics.ip_health,
                domain_health: &metrics.domain_health,
            },
            "{}",
            JsonContext::Snapshot { field: "details" },
            "Failed to serialize snapshot details",
        );

        let snapshot = MtaSnapshotDbModel {
            id: 0,
            collected_at: datetime_to_ms(metrics.collected_at),
            mta_version: metrics.status.as_ref().map(|s| s.version.clone()),
            mta_uptime: metrics.status.as_ref().map(|s| s.uptime.clone()),
            queued_recipients: metrics.status.as_ref().map(|s| s.queued_recipients as i64),
            queued_domains: metrics.status.as_ref().map(|s| s.queued_domains as i64),
            vmta_count: metrics.vmtas.as_ref().map(|v| v.len() as i64),
            domain_count: metrics.domains.as_ref().map(|d| d.len() as i64),
            accounting_records: metrics.accounting_records as i64,
            details,
        };

        retry_on_sqlite_busy("insert_snapshot", || {
            self.snapshots.insert_snapshot(&snapshot)
        })
        .await
    }
}

fn degrade<T>(endpoint: &'static str, result: pmta_api::Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(endpoint, error = %e, "Management API fetch failed");
            None
        }
    }
}

/// Lifetime counter deltas per fleet address.
fn counter_deltas(ip_health: &HashMap<String, IpHealth>) -> Vec<(String, CounterDelta)> {
    let mut deltas: Vec<_> = ip_health
        .iter()
        .filter(|(address, health)| {
            if address.as_str() == UNKNOWN_SOURCE_IP {
                debug!(records = health.total_sent, "Accounting records without a source IP");
                return false;
            }
            true
        })
        .map(|(address, health)| {
            let delta = CounterDelta {
                delivered: health.delivered as i64,
                bounced: health.bounced as i64,
                complained: health.complained as i64,
            };
            (address.clone(), delta)
        })
        .collect();
    deltas.sort_by(|a, b| a.0.cmp(&b.0));
    deltas
}

/// Warmup actuals per source IP and UTC day of `time_logged`, so a backlog
/// is credited to the day it was sent.
fn dated_actuals(records: &[AccountingRecord]) -> Vec<DatedActuals> {
    let mut by_day: BTreeMap<(&str, String), WarmupActuals> = BTreeMap::new();

    for record in records {
        if record.source_ip.is_empty() {
            continue;
        }
        let (sent, bounced, complained) = match &record.record_type {
            RecordType::Delivered => (1, 0, 0),
            t if t.is_bounce() => (1, 1, 0),
            RecordType::Complaint => (0, 0, 1),
            _ => continue,
        };
        let day = by_day
            .entry((record.source_ip.as_str(), date_key(record.time_logged)))
            .or_default();
        day.sent += sent;
        day.bounced += bounced;
        day.complained += complained;
    }

    by_day
        .into_iter()
        .map(|((ip_address, date), actuals)| DatedActuals {
            ip_address: ip_address.to_string(),
            date,
            actuals,
        })
        .collect()
}
