//! Logging setup: console output, optional daily-rolling file, log retention.

use chrono::{Local, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "ipwarm=info,pmta_api=info,pmta_accounting=info,sqlx=warn";

/// Rolling log file prefix; files are named `ipwarm.log.YYYY-MM-DD`.
const LOG_FILE_PREFIX: &str = "ipwarm.log";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

/// Timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Keeps the file writer alive; drop it only at process exit.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
    log_dir: Option<PathBuf>,
}

impl LoggingGuard {
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    /// Delete rolled log files older than the retention period, daily, until cancelled.
    pub fn start_retention_cleanup(
        &self,
        cancel_token: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let log_dir = self.log_dir.clone()?;

        Some(tokio::spawn(async move {
            let cleanup_interval = Duration::from_secs(24 * 60 * 60);
            let mut interval = tokio::time::interval(cleanup_interval);

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Log retention cleanup task shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS).await {
                            warn!(error = %e, "Failed to cleanup old logs");
                        }
                    }
                }
            }
        }))
    }
}

/// Install the global subscriber. `RUST_LOG` overrides [`DEFAULT_LOG_FILTER`].
pub fn init_logging(log_dir: Option<&Path>) -> crate::Result<LoggingGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let (file_layer, file_guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(file_layer)
        .try_init()
        .map_err(|e| crate::Error::config(format!("Failed to set global subscriber: {e}")))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
        log_dir: log_dir.map(Path::to_path_buf),
    })
}

/// Date suffix of a rolled log file name, if it is one of ours.
fn rolled_file_date(filename: &str) -> Option<NaiveDate> {
    let date = filename.strip_prefix(LOG_FILE_PREFIX)?.strip_prefix('.')?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Delete rolled log files older than `retention_days`.
async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).date_naive();

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(rolled_file_date)
        else {
            continue;
        };

        if file_date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
            }
        }
    }

    if deleted > 0 {
        info!(count = deleted, "Cleaned up old log files");
    }
    Ok(deleted)
}
