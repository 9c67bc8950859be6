//! Dependency injection container.
//!
//! Builds the pools, repositories and the three background schedulers from
//! [`AppConfig`] and owns their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use pmta_api::PmtaClient;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::collector::Collector;
use crate::config::AppConfig;
use crate::database::repositories::{
    AccountingLedgerRepository, MtaSnapshotRepository, SendingIpRepository,
    SqlxAccountingLedgerRepository, SqlxMtaSnapshotRepository, SqlxSendingIpRepository,
    SqlxWarmupLogRepository, WarmupLogRepository,
};
use crate::database::{self, DbPool};
use crate::dns::{
    BlacklistMonitor, DNS_QUERY_TIMEOUT, DnsHealthChecker, DnsResolver, TrustDnsResolver,
};
use crate::reconciliation::ReconciliationEngine;
use crate::warmup::{IpLifecycle, WarmupScheduler};

/// Default timeout for waiting on background tasks during shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ServiceContainer {
    pool: DbPool,
    /// Subscriber read replica, when configured.
    replica_pool: Option<DbPool>,
    pub ips: Arc<dyn SendingIpRepository>,
    pub logs: Arc<dyn WarmupLogRepository>,
    pub snapshots: Arc<dyn MtaSnapshotRepository>,
    pub client: Option<PmtaClient>,
    pub dns_checker: Arc<DnsHealthChecker>,
    pub warmup_scheduler: Arc<WarmupScheduler>,
    pub blacklist_monitor: Arc<BlacklistMonitor>,
    pub collector: Arc<Collector>,
    cancellation_token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceContainer {
    /// Open the databases, apply migrations and build every service.
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let pool = database::init_pool(&config.database_url).await?;
        database::run_migrations(&pool).await?;

        let replica_pool = match &config.subscriber_database_url {
            Some(url) => {
                info!("Using subscriber read replica");
                Some(database::init_replica_pool(url).await?)
            }
            None => None,
        };

        let resolver: Arc<dyn DnsResolver> = Arc::new(TrustDnsResolver::new(DNS_QUERY_TIMEOUT));
        Self::with_pool(pool, replica_pool, resolver, config)
    }

    /// Build the services on top of already-migrated pools.
    pub fn with_pool(
        pool: DbPool,
        replica_pool: Option<DbPool>,
        resolver: Arc<dyn DnsResolver>,
        config: &AppConfig,
    ) -> Result<Self> {
        let cancellation_token = CancellationToken::new();

        let ips: Arc<dyn SendingIpRepository> =
            Arc::new(SqlxSendingIpRepository::new(pool.clone()));
        let logs: Arc<dyn WarmupLogRepository> =
            Arc::new(SqlxWarmupLogRepository::new(pool.clone()));
        let snapshots: Arc<dyn MtaSnapshotRepository> =
            Arc::new(SqlxMtaSnapshotRepository::new(pool.clone()));

        let client = config.pmta.as_ref().map(PmtaClient::new).transpose()?;
        if client.is_none() {
            info!("PMTA_API_URL not set; collector will only read the accounting file");
        }

        let dns_checker = Arc::new(DnsHealthChecker::new(resolver, ips.clone()));

        let subscribers = replica_pool.clone().unwrap_or_else(|| pool.clone());
        let warmup_scheduler = Arc::new(WarmupScheduler::new(
            ips.clone(),
            logs.clone(),
            subscribers,
            config.warmup.clone(),
            cancellation_token.child_token(),
        ));
        let blacklist_monitor = Arc::new(BlacklistMonitor::new(
            dns_checker.clone(),
            ips.clone(),
            config.blacklist.clone(),
            cancellation_token.child_token(),
        ));
        let ledger: Arc<dyn AccountingLedgerRepository> =
            Arc::new(SqlxAccountingLedgerRepository::new(pool.clone()));
        let collector = Arc::new(Collector::new(
            client.clone(),
            ledger,
            snapshots.clone(),
            config.collector.clone(),
            cancellation_token.child_token(),
        ));

        Ok(Self {
            pool,
            replica_pool,
            ips,
            logs,
            snapshots,
            client,
            dns_checker,
            warmup_scheduler,
            blacklist_monitor,
            collector,
            cancellation_token,
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn lifecycle(&self) -> IpLifecycle {
        IpLifecycle::new(self.ips.clone())
    }

    pub fn reconciliation(&self) -> ReconciliationEngine {
        ReconciliationEngine::new(self.pool.clone())
    }

    /// Spawn the warmup scheduler, blacklist monitor and collector.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        handles.push(self.warmup_scheduler.clone().start());
        handles.push(self.blacklist_monitor.clone().start());
        handles.push(self.collector.clone().start());
        info!("Started {} background services", handles.len());
    }

    pub async fn shutdown(&self) {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Cancel every service, wait for the tasks to exit and close the pools.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) {
        info!("Shutting down services (timeout: {:?})", timeout);
        self.cancellation_token.cancel();

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        let joined = tokio::time::timeout(timeout, futures::future::join_all(handles)).await;
        match joined {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!(error = %e, "Background task ended abnormally");
                    }
                }
            }
            Err(_) => warn!("Shutdown timeout reached, forcing shutdown"),
        }

        info!("Closing database pool...");
        self.pool.close().await;
        if let Some(replica) = &self.replica_pool {
            replica.close().await;
        }
        info!("Services shut down");
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
