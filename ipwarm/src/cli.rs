//! Operator command line.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use pmta_accounting::{aggregate_by_domain, aggregate_by_ip, parse_file};
use serde::Serialize;
use tracing::info;

use crate::config::AppConfig;
use crate::logging::LoggingGuard;
use crate::services::ServiceContainer;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the warmup scheduler, blacklist monitor and collector until Ctrl-C
    Run,
    /// List every sending IP
    Ips,
    /// Register a new sending IP and start its warmup
    Provision {
        ip: String,
        /// Hostname the IP's PTR record should point to
        hostname: String,
    },
    /// Pause a sending IP
    Pause { ip: String },
    /// Resume a paused IP's warmup
    Resume { ip: String },
    /// Permanently retire a sending IP
    Retire { ip: String },
    /// Run the DNS and DNSBL checks for one IP now
    CheckIp { ip: String },
    /// Pick today's warmup recipients for an IP
    Recipients { ip: String },
    /// Compare MTA counters with platform tracking events
    Reconcile {
        /// Period start, RFC 3339 or YYYY-MM-DD (default: 24 hours before --end)
        #[arg(long)]
        start: Option<String>,
        /// Period end, RFC 3339 or YYYY-MM-DD (default: now)
        #[arg(long)]
        end: Option<String>,
        /// Print per-IP counters instead of the totals report
        #[arg(long)]
        per_ip: bool,
    },
    /// Parse an accounting file and print per-IP and per-domain health
    ParseAccounting { file: PathBuf },
    /// MTA management operations
    Mta {
        #[command(subcommand)]
        command: MtaCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum MtaCommand {
    /// Ask the MTA to re-read its configuration
    Reload,
    /// Replace the MTA configuration file
    UploadConfig { file: PathBuf },
}

#[derive(Serialize)]
struct AccountingSummary<T, U> {
    records: usize,
    ip_health: T,
    domain_health: U,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse a reconciliation bound. Bare dates cover the whole UTC day.
pub fn parse_bound(raw: &str, end_of_day: bool) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid date {raw:?}, expected RFC 3339 or YYYY-MM-DD"))?;
    let time = if end_of_day {
        date.and_hms_milli_opt(23, 59, 59, 999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    match time {
        Some(t) => Ok(t.and_utc()),
        None => bail!("invalid date {raw:?}"),
    }
}

fn parse_accounting(file: &Path) -> anyhow::Result<()> {
    let records =
        parse_file(file).with_context(|| format!("failed to parse {}", file.display()))?;
    print_json(&AccountingSummary {
        records: records.len(),
        ip_health: aggregate_by_ip(&records).into_iter().collect::<BTreeMap<_, _>>(),
        domain_health: aggregate_by_domain(&records)
            .into_iter()
            .collect::<BTreeMap<_, _>>(),
    })
}

pub async fn execute(cli: Cli, config: AppConfig, logging: &LoggingGuard) -> anyhow::Result<()> {
    if let Command::ParseAccounting { file } = &cli.command {
        return parse_accounting(file);
    }

    let container = ServiceContainer::new(&config)
        .await
        .context("failed to initialize services")?;
    let result = dispatch(cli.command, &container, logging).await;
    if !container.is_shutting_down() {
        container.shutdown().await;
    }
    result
}

async fn dispatch(
    command: Command,
    container: &ServiceContainer,
    logging: &LoggingGuard,
) -> anyhow::Result<()> {
    match command {
        Command::Run => {
            container.start().await;
            let cleanup = logging.start_retention_cleanup(container.cancellation_token());

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            info!("Received Ctrl-C, shutting down");

            container.shutdown().await;
            if let Some(handle) = cleanup {
                let _ = handle.await;
            }
            Ok(())
        }
        Command::Ips => print_json(&container.ips.list_ips().await?),
        Command::Provision { ip, hostname } => {
            print_json(&container.lifecycle().provision(&ip, &hostname).await?)
        }
        Command::Pause { ip } => print_json(&container.lifecycle().pause(&ip).await?),
        Command::Resume { ip } => print_json(&container.lifecycle().resume(&ip).await?),
        Command::Retire { ip } => print_json(&container.lifecycle().retire(&ip).await?),
        Command::CheckIp { ip } => {
            let record = container.ips.get_ip_by_address(&ip).await?;
            let dns = container
                .dns_checker
                .check_dns(&record.ip_address, &record.hostname)
                .await?;
            let blacklists = container
                .dns_checker
                .check_blacklists(&record.ip_address)
                .await?;
            print_json(&serde_json::json!({ "dns": dns, "blacklists": blacklists }))
        }
        Command::Recipients { ip } => {
            let record = container.ips.get_ip_by_address(&ip).await?;
            let recipients = container
                .warmup_scheduler
                .select_warmup_recipients(record.warmup_day, record.warmup_daily_limit)
                .await?;
            print_json(&recipients)
        }
        Command::Reconcile {
            start,
            end,
            per_ip,
        } => {
            let engine = container.reconciliation();
            if per_ip {
                return print_json(&engine.reconcile_per_ip().await?);
            }
            let end = match end {
                Some(raw) => parse_bound(&raw, true)?,
                None => Utc::now(),
            };
            let start = match start {
                Some(raw) => parse_bound(&raw, false)?,
                None => end - ChronoDuration::hours(24),
            };
            if start > end {
                bail!("--start must not be after --end");
            }
            print_json(&engine.reconcile(start, end).await)
        }
        Command::ParseAccounting { file } => parse_accounting(&file),
        Command::Mta { command } => {
            let Some(client) = &container.client else {
                bail!("PMTA_API_URL is not set");
            };
            match command {
                MtaCommand::Reload => {
                    client.reload().await?;
                    info!("MTA configuration reloaded");
                }
                MtaCommand::UploadConfig { file } => {
                    let contents = tokio::fs::read_to_string(&file)
                        .await
                        .with_context(|| format!("failed to read {}", file.display()))?;
                    client.upload_config(contents).await?;
                    info!(file = %file.display(), "MTA configuration uploaded");
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_reconcile_args() {
        let cli = Cli::try_parse_from([
            "ipwarm",
            "reconcile",
            "--start",
            "2024-06-01",
            "--end",
            "2024-06-02",
            "--per-ip",
        ])
        .unwrap();
        match cli.command {
            Command::Reconcile {
                start,
                end,
                per_ip,
            } => {
                assert_eq!(start.as_deref(), Some("2024-06-01"));
                assert_eq!(end.as_deref(), Some("2024-06-02"));
                assert!(per_ip);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["ipwarm", "provision", "203.0.113.10", "mta1.example.com"])
            .unwrap();
        assert!(matches!(cli.command, Command::Provision { .. }));
    }

    #[test]
    fn test_parse_bound() {
        let start = parse_bound("2024-06-01", false).unwrap();
        assert_eq!(start.to_rfc3339(), "2024-06-01T00:00:00+00:00");

        let end = parse_bound("2024-06-01", true).unwrap();
        assert_eq!(end.timestamp_millis() - start.timestamp_millis(), 86_399_999);

        let exact = parse_bound("2024-06-01T12:30:00+02:00", false).unwrap();
        assert_eq!(exact.to_rfc3339(), "2024-06-01T10:30:00+00:00");

        assert!(parse_bound("June 1st", false).is_err());
    }
}
