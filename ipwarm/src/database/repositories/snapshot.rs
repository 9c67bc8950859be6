//! MTA snapshot repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::MtaSnapshotDbModel;

#[async_trait]
pub trait MtaSnapshotRepository: Send + Sync {
    /// Insert a snapshot; `id` is ignored and the new row id returned.
    async fn insert_snapshot(&self, snapshot: &MtaSnapshotDbModel) -> Result<i64>;
    async fn list_recent_snapshots(&self, limit: i64) -> Result<Vec<MtaSnapshotDbModel>>;
}

/// SQLx implementation of MtaSnapshotRepository.
pub struct SqlxMtaSnapshotRepository {
    pool: SqlitePool,
}

impl SqlxMtaSnapshotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MtaSnapshotRepository for SqlxMtaSnapshotRepository {
    async fn insert_snapshot(&self, snapshot: &MtaSnapshotDbModel) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO mta_snapshots (
                collected_at, mta_version, mta_uptime, queued_recipients, queued_domains,
                vmta_count, domain_count, accounting_records, details
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.collected_at)
        .bind(&snapshot.mta_version)
        .bind(&snapshot.mta_uptime)
        .bind(snapshot.queued_recipients)
        .bind(snapshot.queued_domains)
        .bind(snapshot.vmta_count)
        .bind(snapshot.domain_count)
        .bind(snapshot.accounting_records)
        .bind(&snapshot.details)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_recent_snapshots(&self, limit: i64) -> Result<Vec<MtaSnapshotDbModel>> {
        let snapshots = sqlx::query_as::<_, MtaSnapshotDbModel>(
            "SELECT * FROM mta_snapshots ORDER BY collected_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(snapshots)
    }
}
