//! Warmup state machine driver.
//!
//! Every tick runs four idempotent phases in order: advance warmup days,
//! enforce thresholds, ensure today's log rows, graduate finished IPs. A failing
//! phase is logged and skipped; the remaining phases still run and the next
//! tick starts over.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::database::models::IpStatus;
use crate::database::repositories::{SendingIpRepository, WarmupLogRepository};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::date_key;
use crate::warmup::recipients::{self, RecipientThresholds, WarmupRecipient};
use crate::warmup::schedule::{WARMUP_DAYS, expected_day, stage_for_day, volume_for_day};
use crate::warmup::thresholds::{self, Thresholds};

/// Configuration for the warmup scheduler.
#[derive(Debug, Clone)]
pub struct WarmupConfig {
    /// Interval between ticks (default: 1 hour).
    pub tick_interval: Duration,
    pub thresholds: Thresholds,
    pub recipients: RecipientThresholds,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60 * 60),
            thresholds: Thresholds::default(),
            recipients: RecipientThresholds::default(),
        }
    }
}

/// What one tick changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub advanced: u64,
    pub paused: u64,
    pub log_entries: u64,
    pub graduated: u64,
    /// Phases abandoned because of an error.
    pub failed_phases: Vec<&'static str>,
}

pub struct WarmupScheduler {
    ips: Arc<dyn SendingIpRepository>,
    logs: Arc<dyn WarmupLogRepository>,
    /// Subscriber database; the read replica when one is configured.
    subscribers: SqlitePool,
    config: WarmupConfig,
    cancellation_token: CancellationToken,
}

impl WarmupScheduler {
    pub fn new(
        ips: Arc<dyn SendingIpRepository>,
        logs: Arc<dyn WarmupLogRepository>,
        subscribers: SqlitePool,
        config: WarmupConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            ips,
            logs,
            subscribers,
            config,
            cancellation_token,
        }
    }

    pub fn config(&self) -> &WarmupConfig {
        &self.config
    }

    /// Start the tick loop. The first tick runs immediately.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!(
                "Warmup scheduler started (interval: {}s)",
                self.config.tick_interval.as_secs()
            );

            loop {
                tokio::select! {
                    _ = self.cancellation_token.cancelled() => {
                        info!("Warmup scheduler shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let report = self.tick().await;
                        debug!(?report, "Warmup tick completed");
                    }
                }
            }
        })
    }

    /// Stop the tick loop after the current tick.
    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }

    pub async fn tick(&self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    /// Run all four phases as of `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        match self.advance_warmup_days(now).await {
            Ok(n) => report.advanced = n,
            Err(e) => phase_failed(&mut report, "advance_warmup_days", &e),
        }
        match self.check_thresholds(now).await {
            Ok(n) => report.paused = n,
            Err(e) => phase_failed(&mut report, "check_thresholds", &e),
        }
        match self.ensure_today_log_entries(now).await {
            Ok(n) => report.log_entries = n,
            Err(e) => phase_failed(&mut report, "ensure_today_log_entries", &e),
        }
        match self.graduate_completed_ips(now).await {
            Ok(n) => report.graduated = n,
            Err(e) => phase_failed(&mut report, "graduate_completed_ips", &e),
        }

        if report.advanced + report.paused + report.graduated > 0 {
            info!(
                advanced = report.advanced,
                paused = report.paused,
                graduated = report.graduated,
                "Warmup tick applied changes"
            );
        }
        report
    }

    /// Move each warming IP to the day implied by its start time.
    pub async fn advance_warmup_days(&self, now: DateTime<Utc>) -> Result<u64> {
        let warming = self.ips.list_ips_by_status(IpStatus::Warmup).await?;
        let mut advanced = 0;

        for ip in warming {
            let Some(started) = ip.warmup_started() else {
                debug!(ip = %ip.ip_address, "Warming IP has no start time; skipping");
                continue;
            };

            let day = expected_day((now - started).num_hours());
            if day <= ip.warmup_day {
                continue;
            }

            let limit = volume_for_day(day);
            let stage = stage_for_day(day);
            let updated = retry_on_sqlite_busy("advance_warmup_day", || {
                self.ips
                    .advance_warmup_day(&ip.id, day, limit, stage.as_str(), now)
            })
            .await?;

            if updated {
                info!(
                    ip = %ip.ip_address,
                    from = ip.warmup_day,
                    to = day,
                    daily_limit = limit,
                    stage = %stage,
                    "Advanced warmup day"
                );
                advanced += 1;
            }
        }

        Ok(advanced)
    }

    /// Pause warming IPs whose counters for today breach the thresholds.
    pub async fn check_thresholds(&self, now: DateTime<Utc>) -> Result<u64> {
        let today = date_key(now);
        let entries = self.logs.list_warming_entries(&today).await?;
        let limits = &self.config.thresholds;
        let mut paused = 0;

        for entry in entries {
            let Some(breach) = thresholds::evaluate(
                limits,
                entry.actual_sent,
                entry.actual_bounced,
                entry.actual_complained,
            ) else {
                continue;
            };

            let reason = breach.reason(limits);
            let applied = retry_on_sqlite_busy("pause_for_breach", || {
                self.logs.pause_for_breach(&entry.ip_id, &today, &reason, now)
            })
            .await?;

            if applied {
                warn!(
                    ip_id = %entry.ip_id,
                    sent = entry.actual_sent,
                    bounced = entry.actual_bounced,
                    complained = entry.actual_complained,
                    "{}",
                    reason
                );
                paused += 1;
            }
        }

        Ok(paused)
    }

    /// Make sure every warming IP has a log row for today.
    pub async fn ensure_today_log_entries(&self, now: DateTime<Utc>) -> Result<u64> {
        let today = date_key(now);
        let warming = self.ips.list_ips_by_status(IpStatus::Warmup).await?;
        let mut ensured = 0;

        for ip in warming {
            retry_on_sqlite_busy("ensure_log_entry", || {
                self.logs
                    .ensure_entry(&ip.id, &today, ip.warmup_daily_limit, ip.warmup_day, now)
            })
            .await?;
            ensured += 1;
        }

        Ok(ensured)
    }

    /// Promote IPs that finished the schedule and started over 30 days ago.
    pub async fn graduate_completed_ips(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - chrono::Duration::days(WARMUP_DAYS);
        let graduated =
            retry_on_sqlite_busy("graduate_ips", || self.ips.graduate_ips(cutoff, now)).await?;
        if graduated > 0 {
            info!("Graduated {} IPs to active", graduated);
        }
        Ok(graduated)
    }

    /// Recipients eligible for an IP on `warmup_day`, best first.
    pub async fn select_warmup_recipients(
        &self,
        warmup_day: i64,
        limit: i64,
    ) -> Result<Vec<WarmupRecipient>> {
        recipients::select_warmup_recipients(
            &self.subscribers,
            &self.config.recipients,
            warmup_day,
            limit,
        )
        .await
    }
}

fn phase_failed(report: &mut TickReport, phase: &'static str, err: &crate::Error) {
    error!(phase, error = %err, "Warmup phase failed; retrying next tick");
    report.failed_phases.push(phase);
}
