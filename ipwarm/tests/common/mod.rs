#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ipwarm::database::models::SendingIpDbModel;
use ipwarm::database::repositories::{
    AccountingBatch, AccountingLedgerRepository, CounterDelta, SendingIpRepository,
    SqlxAccountingLedgerRepository, SqlxMtaSnapshotRepository, SqlxSendingIpRepository,
    SqlxWarmupLogRepository,
};
use ipwarm::database::time::datetime_to_ms;
use ipwarm::database::{self, DbPool};

/// In-memory databases live on a single connection, so the pool holds exactly one.
pub async fn setup_test_db() -> DbPool {
    let pool = database::init_pool_with_size("sqlite::memory:", 1)
        .await
        .unwrap();
    database::run_migrations(&pool).await.unwrap();
    pool
}

pub struct Repos {
    pub ips: Arc<SqlxSendingIpRepository>,
    pub logs: Arc<SqlxWarmupLogRepository>,
    pub snapshots: Arc<SqlxMtaSnapshotRepository>,
    pub ledger: Arc<SqlxAccountingLedgerRepository>,
}

pub fn repos(pool: &DbPool) -> Repos {
    Repos {
        ips: Arc::new(SqlxSendingIpRepository::new(pool.clone())),
        logs: Arc::new(SqlxWarmupLogRepository::new(pool.clone())),
        snapshots: Arc::new(SqlxMtaSnapshotRepository::new(pool.clone())),
        ledger: Arc::new(SqlxAccountingLedgerRepository::new(pool.clone())),
    }
}

/// Insert a warming IP whose warmup began at `started`.
pub async fn insert_warming_ip(
    ips: &SqlxSendingIpRepository,
    address: &str,
    hostname: &str,
    started: DateTime<Utc>,
) -> SendingIpDbModel {
    let mut ip = SendingIpDbModel::new(address, hostname);
    ip.warmup_started_at = Some(datetime_to_ms(started));
    ips.create_ip(&ip).await.unwrap();
    ip
}

/// Add lifetime counters through the ledger, as a collector cycle would.
pub async fn add_counters(r: &Repos, address: &str, delta: CounterDelta, now: DateTime<Utc>) {
    let batch = AccountingBatch {
        counters: vec![(address.to_string(), delta)],
        ..Default::default()
    };
    r.ledger.apply_batch(&batch, now).await.unwrap();
}

pub async fn insert_subscriber(pool: &DbPool, id: &str, score: f64, source: &str, status: &str) {
    sqlx::query(
        "INSERT INTO subscribers (id, email, status, data_quality_score, data_source) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(format!("{id}@example.net"))
    .bind(status)
    .bind(score)
    .bind(source)
    .execute(pool)
    .await
    .unwrap();
}
