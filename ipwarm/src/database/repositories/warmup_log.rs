//! Warmup log repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::WarmupLogDbModel;
use crate::database::time::datetime_to_ms;

/// Warmup log repository trait.
#[async_trait]
pub trait WarmupLogRepository: Send + Sync {
    async fn get_entry(&self, ip_id: &str, date: &str) -> Result<Option<WarmupLogDbModel>>;
    async fn list_entries_for_ip(&self, ip_id: &str) -> Result<Vec<WarmupLogDbModel>>;

    /// Rows for `date` that belong to IPs currently in warmup.
    async fn list_warming_entries(&self, date: &str) -> Result<Vec<WarmupLogDbModel>>;

    /// Insert the day's row as in_progress. An existing row is only upgraded
    /// from pending; completed and failed rows are left alone.
    async fn ensure_entry(
        &self,
        ip_id: &str,
        date: &str,
        planned_volume: i64,
        warmup_day: i64,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Pause a warming IP and mark the day failed with `reason`, atomically.
    /// Returns false when the IP was no longer in warmup.
    async fn pause_for_breach(
        &self,
        ip_id: &str,
        date: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

}

/// SQLx implementation of WarmupLogRepository.
pub struct SqlxWarmupLogRepository {
    pool: SqlitePool,
}

impl SqlxWarmupLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WarmupLogRepository for SqlxWarmupLogRepository {
    async fn get_entry(&self, ip_id: &str, date: &str) -> Result<Option<WarmupLogDbModel>> {
        let entry = sqlx::query_as::<_, WarmupLogDbModel>(
            "SELECT * FROM warmup_log WHERE ip_id = ? AND date = ?",
        )
        .bind(ip_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn list_entries_for_ip(&self, ip_id: &str) -> Result<Vec<WarmupLogDbModel>> {
        let entries = sqlx::query_as::<_, WarmupLogDbModel>(
            "SELECT * FROM warmup_log WHERE ip_id = ? ORDER BY date ASC",
        )
        .bind(ip_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn list_warming_entries(&self, date: &str) -> Result<Vec<WarmupLogDbModel>> {
        let entries = sqlx::query_as::<_, WarmupLogDbModel>(
            r#"
            SELECT w.* FROM warmup_log w
            JOIN sending_ips s ON s.id = w.ip_id
            WHERE w.date = ? AND s.status = 'warmup'
            ORDER BY w.ip_id
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn ensure_entry(
        &self,
        ip_id: &str,
        date: &str,
        planned_volume: i64,
        warmup_day: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let now_ms = datetime_to_ms(now);
        sqlx::query(
            r#"
            INSERT INTO warmup_log (ip_id, date, planned_volume, warmup_day, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'in_progress', ?, ?)
            ON CONFLICT(ip_id, date) DO UPDATE SET
                status = 'in_progress',
                updated_at = excluded.updated_at
            WHERE warmup_log.status = 'pending'
            "#,
        )
        .bind(ip_id)
        .bind(date)
        .bind(planned_volume)
        .bind(warmup_day)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pause_for_breach(
        &self,
        ip_id: &str,
        date: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let now_ms = datetime_to_ms(now);
        let mut tx = self.pool.begin().await?;

        let paused = sqlx::query(
            "UPDATE sending_ips SET status = 'paused', updated_at = ? WHERE id = ? AND status = 'warmup'",
        )
        .bind(now_ms)
        .bind(ip_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if paused {
            sqlx::query(
                "UPDATE warmup_log SET status = 'failed', notes = ?, updated_at = ? WHERE ip_id = ? AND date = ?",
            )
            .bind(reason)
            .bind(now_ms)
            .bind(ip_id)
            .bind(date)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(paused)
    }
}
