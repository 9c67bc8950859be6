//! Persistence layer: SQLite via sqlx.
//!
//! Pool setup, migrations, row models and repositories for the sending IP fleet
//! and the daily warmup log.

pub mod models;
pub mod repositories;
pub mod retry;
pub mod time;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

/// Default connection pool size.
const DEFAULT_POOL_SIZE: u32 = 8;

/// Default busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

/// Page cache size; negative values are KiB (16MB).
const DEFAULT_CACHE_SIZE_KB: i32 = -16000;

/// WAL auto-checkpoint threshold in pages.
const DEFAULT_WAL_AUTOCHECKPOINT_PAGES: i32 = 1000;

/// Limit WAL size growth (bytes).
const DEFAULT_JOURNAL_SIZE_LIMIT_BYTES: i64 = 32 * 1024 * 1024;

async fn apply_per_connection_pragmas(
    conn: &mut sqlx::SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "PRAGMA wal_autocheckpoint = {}",
        DEFAULT_WAL_AUTOCHECKPOINT_PAGES
    ))
    .execute(&mut *conn)
    .await?;

    sqlx::query(&format!(
        "PRAGMA journal_size_limit = {}",
        DEFAULT_JOURNAL_SIZE_LIMIT_BYTES
    ))
    .execute(&mut *conn)
    .await?;

    sqlx::query(&format!("PRAGMA cache_size = {}", DEFAULT_CACHE_SIZE_KB))
        .execute(&mut *conn)
        .await?;

    sqlx::query("PRAGMA temp_store = MEMORY")
        .execute(&mut *conn)
        .await?;

    Ok(())
}

async fn ensure_wal_mode(pool: &DbPool, pool_name: &str) -> Result<(), sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let row = sqlx::query("PRAGMA journal_mode")
        .fetch_one(&mut *conn)
        .await?;
    let mode: String = row.get(0);
    if mode != "wal" && mode != "memory" {
        tracing::warn!(
            "{}_journal_mode was '{}', expected 'wal'; re-setting",
            pool_name,
            mode
        );
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Initialize a pool with WAL mode, busy timeout and foreign keys enabled.
///
/// `database_url` is a sqlx SQLite URL such as `sqlite:ipwarm.db?mode=rwc`.
/// In-memory databases are private to one connection, so callers using
/// `sqlite::memory:` should pass `max_connections = 1`.
pub async fn init_pool_with_size(
    database_url: &str,
    max_connections: u32,
) -> Result<DbPool, sqlx::Error> {
    let connect_options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .after_connect(|conn, _meta| {
            Box::pin(async move { apply_per_connection_pragmas(&mut *conn).await })
        })
        .connect_with(connect_options)
        .await?;

    ensure_wal_mode(&pool, "pool").await?;

    tracing::info!(
        "Database pool initialized with WAL mode, {} max connections",
        max_connections
    );

    Ok(pool)
}

/// Initialize the database connection pool with the default size.
pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    init_pool_with_size(database_url, DEFAULT_POOL_SIZE).await
}

/// Open the read-only subscriber replica used for recipient selection.
pub async fn init_replica_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let connect_options = SqliteConnectOptions::from_str(database_url)?
        .read_only(true)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(DEFAULT_POOL_SIZE / 2)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(connect_options)
        .await?;

    tracing::info!("Subscriber replica pool initialized");
    Ok(pool)
}

pub async fn run_migrations(pool: &DbPool) -> crate::Result<()> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_pool() {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();

        // In-memory databases report "memory"; file databases report "wal".
        assert!(result.0 == "memory" || result.0 == "wal");
    }

    #[tokio::test]
    async fn test_run_migrations_is_repeatable() {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('sending_ips', 'warmup_log')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 2);
    }
}
