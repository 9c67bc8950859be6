//! Accounting ledger repository.
//!
//! Everything one collector cycle derives from the accounting file lands in a
//! single transaction: lifetime counters, warmup log actuals and the file
//! position they were read up to. A failed cycle leaves all three untouched,
//! so the same bytes are read and applied again on the next cycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pmta_accounting::ParserStrategy;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::Result;
use crate::database::models::{AccountingCursorDbModel, IpStatus, WarmupActuals};
use crate::database::time::{date_key, datetime_to_ms};
use crate::utils::json::{self, JsonContext};

/// Lifetime delivery counters to add to an IP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub delivered: i64,
    pub bounced: i64,
    pub complained: i64,
}

impl CounterDelta {
    /// Complaints are not part of sent.
    pub fn sent(&self) -> i64 {
        self.delivered + self.bounced
    }
}

/// Warmup actuals for one IP on the UTC day the records were logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedActuals {
    pub ip_address: String,
    /// `YYYY-MM-DD`
    pub date: String,
    pub actuals: WarmupActuals,
}

/// Where the batch stops in its accounting file.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorPosition {
    pub path: String,
    pub offset: u64,
    pub strategy: ParserStrategy,
}

/// One cycle's worth of accounting changes.
#[derive(Debug, Clone, Default)]
pub struct AccountingBatch {
    /// Lifetime counter deltas by IP address.
    pub counters: Vec<(String, CounterDelta)>,
    pub actuals: Vec<DatedActuals>,
    pub cursor: Option<CursorPosition>,
}

impl AccountingBatch {
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.actuals.is_empty() && self.cursor.is_none()
    }
}

/// What an applied batch touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// IPs whose lifetime counters were updated.
    pub counted_ips: u64,
    /// Addresses not in the fleet.
    pub unknown_ips: u64,
    /// Warmup log rows created or incremented.
    pub log_rows: u64,
}

/// Accounting ledger repository trait.
#[async_trait]
pub trait AccountingLedgerRepository: Send + Sync {
    async fn get_cursor(&self, path: &str) -> Result<Option<AccountingCursorDbModel>>;

    /// Apply counters, warmup actuals and the cursor position atomically.
    ///
    /// Actuals only go to IPs currently in warmup. Today's row is created when
    /// missing; rows for earlier days are incremented only if they exist.
    async fn apply_batch(&self, batch: &AccountingBatch, now: DateTime<Utc>)
    -> Result<BatchOutcome>;
}

/// SQLx implementation of AccountingLedgerRepository.
pub struct SqlxAccountingLedgerRepository {
    pool: SqlitePool,
}

impl SqlxAccountingLedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountingLedgerRepository for SqlxAccountingLedgerRepository {
    async fn get_cursor(&self, path: &str) -> Result<Option<AccountingCursorDbModel>> {
        let cursor = sqlx::query_as::<_, AccountingCursorDbModel>(
            "SELECT * FROM accounting_cursors WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(cursor)
    }

    async fn apply_batch(
        &self,
        batch: &AccountingBatch,
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        if batch.is_empty() {
            return Ok(outcome);
        }

        let now_ms = datetime_to_ms(now);
        let today = date_key(now);
        let mut tx = self.pool.begin().await?;

        for (address, delta) in &batch.counters {
            if add_counters(&mut tx, address, *delta, now_ms).await? {
                outcome.counted_ips += 1;
            } else {
                debug!(ip = %address, "Accounting source IP is not in the fleet");
                outcome.unknown_ips += 1;
            }
        }

        for dated in &batch.actuals {
            if dated.actuals.is_empty() {
                continue;
            }
            if add_actuals(&mut tx, dated, &today, now_ms).await? {
                outcome.log_rows += 1;
            }
        }

        if let Some(cursor) = &batch.cursor {
            save_cursor(&mut tx, cursor, now_ms).await?;
        }

        tx.commit().await?;
        Ok(outcome)
    }
}

async fn add_counters(
    conn: &mut SqliteConnection,
    ip_address: &str,
    delta: CounterDelta,
    now_ms: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE sending_ips
        SET total_sent = total_sent + ?,
            total_delivered = total_delivered + ?,
            total_bounced = total_bounced + ?,
            total_complained = total_complained + ?,
            updated_at = ?
        WHERE ip_address = ?
        "#,
    )
    .bind(delta.sent())
    .bind(delta.delivered)
    .bind(delta.bounced)
    .bind(delta.complained)
    .bind(now_ms)
    .bind(ip_address)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn add_actuals(
    conn: &mut SqliteConnection,
    dated: &DatedActuals,
    today: &str,
    now_ms: i64,
) -> Result<bool> {
    let ip: Option<(String, i64, i64)> = sqlx::query_as(
        "SELECT id, warmup_daily_limit, warmup_day FROM sending_ips WHERE ip_address = ? AND status = ?",
    )
    .bind(&dated.ip_address)
    .bind(IpStatus::Warmup.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    let Some((ip_id, daily_limit, warmup_day)) = ip else {
        return Ok(false);
    };
    let actuals = dated.actuals;

    let result = if dated.date == today {
        sqlx::query(
            r#"
            INSERT INTO warmup_log (
                ip_id, date, planned_volume, warmup_day, status,
                actual_sent, actual_bounced, actual_complained, created_at, updated_at
            ) VALUES (?, ?, ?, ?, 'in_progress', ?, ?, ?, ?, ?)
            ON CONFLICT(ip_id, date) DO UPDATE SET
                actual_sent = warmup_log.actual_sent + excluded.actual_sent,
                actual_bounced = warmup_log.actual_bounced + excluded.actual_bounced,
                actual_complained = warmup_log.actual_complained + excluded.actual_complained,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&ip_id)
        .bind(&dated.date)
        .bind(daily_limit)
        .bind(warmup_day)
        .bind(actuals.sent)
        .bind(actuals.bounced)
        .bind(actuals.complained)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&mut *conn)
        .await?
    } else {
        // The plan for an earlier day is unknown here; only top up a row the scheduler created.
        sqlx::query(
            r#"
            UPDATE warmup_log
            SET actual_sent = actual_sent + ?,
                actual_bounced = actual_bounced + ?,
                actual_complained = actual_complained + ?,
                updated_at = ?
            WHERE ip_id = ? AND date = ?
            "#,
        )
        .bind(actuals.sent)
        .bind(actuals.bounced)
        .bind(actuals.complained)
        .bind(now_ms)
        .bind(&ip_id)
        .bind(&dated.date)
        .execute(&mut *conn)
        .await?
    };

    Ok(result.rows_affected() > 0)
}

async fn save_cursor(
    conn: &mut SqliteConnection,
    cursor: &CursorPosition,
    now_ms: i64,
) -> Result<()> {
    let strategy = json::to_string_or_fallback(
        &cursor.strategy,
        "",
        JsonContext::Cursor { path: &cursor.path },
        "Failed to serialize accounting cursor strategy",
    );
    let offset = i64::try_from(cursor.offset).unwrap_or(i64::MAX);

    sqlx::query(
        r#"
        INSERT INTO accounting_cursors (path, byte_offset, strategy, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(path) DO UPDATE SET
            byte_offset = excluded.byte_offset,
            strategy = excluded.strategy,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&cursor.path)
    .bind(offset)
    .bind(strategy)
    .bind(now_ms)
    .execute(conn)
    .await?;
    Ok(())
}
