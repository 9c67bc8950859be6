//! Busy/locked retry for SQLite writes.
//!
//! The collector, the warmup scheduler and the blacklist monitor all write to
//! the same database file; a writer that loses the lock backs off and retries.

use rand::random;
use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::{Error, Result};

const MAX_RETRIES: usize = 8;
const BASE_DELAY_MS: u64 = 20;
const MAX_DELAY_MS: u64 = 2000;

fn is_sqlite_busy_error(err: &Error) -> bool {
    let Error::DatabaseSqlx(sqlx_err) = err else {
        return false;
    };

    let sqlx::Error::Database(db_err) = sqlx_err else {
        return mentions_lock(&sqlx_err.to_string());
    };

    // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
    let code = db_err.code().map(Cow::into_owned);
    if matches!(code.as_deref(), Some("5") | Some("6")) {
        return true;
    }
    mentions_lock(db_err.message())
}

fn mentions_lock(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

/// Exponential delay for `attempt` (0-based), capped, before jitter.
fn backoff_ms(attempt: usize) -> u64 {
    let shift = attempt.min(16) as u32;
    BASE_DELAY_MS.saturating_mul(1u64 << shift).min(MAX_DELAY_MS)
}

/// Run `op`, retrying with jittered exponential backoff while SQLite reports
/// the database as busy or locked. Other errors are returned immediately.
pub async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_sqlite_busy_error(&err) && attempt < MAX_RETRIES => {
                let base = backoff_ms(attempt);
                let jitter = random::<u64>() % (base / 4 + 1);
                let delay = Duration::from_millis((base + jitter).min(MAX_DELAY_MS));

                debug!(
                    op = op_name,
                    attempt = attempt + 1,
                    max = MAX_RETRIES,
                    ?delay,
                    "SQLite busy, retrying"
                );

                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
