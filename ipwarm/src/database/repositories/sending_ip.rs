//! Sending IP repository.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::database::models::{IpStatus, SendingIpDbModel};
use crate::database::time::datetime_to_ms;
use crate::utils::json::{self, JsonContext};
use crate::{Error, Result};

/// Sending IP repository trait.
#[async_trait]
pub trait SendingIpRepository: Send + Sync {
    async fn get_ip(&self, id: &str) -> Result<SendingIpDbModel>;
    async fn get_ip_by_address(&self, ip_address: &str) -> Result<SendingIpDbModel>;
    async fn list_ips(&self) -> Result<Vec<SendingIpDbModel>>;
    async fn list_ips_by_status(&self, status: IpStatus) -> Result<Vec<SendingIpDbModel>>;
    /// IPs whose status is monitored, least recently DNS-checked first.
    async fn list_ips_for_health_check(&self) -> Result<Vec<SendingIpDbModel>>;
    async fn create_ip(&self, ip: &SendingIpDbModel) -> Result<()>;

    /// Compare-and-set status change. Returns false when the row was not in `from`.
    async fn update_status(
        &self,
        id: &str,
        from: IpStatus,
        to: IpStatus,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Move a warming IP forward to `day`. Never moves the day backwards.
    async fn advance_warmup_day(
        &self,
        id: &str,
        day: i64,
        daily_limit: i64,
        stage: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Promote warming IPs on the last schedule day that started before `started_before`.
    async fn graduate_ips(&self, started_before: DateTime<Utc>, now: DateTime<Utc>)
    -> Result<u64>;

    /// Returns false if `ip_address` is not in the fleet.
    async fn record_dns_check(
        &self,
        ip_address: &str,
        rdns_verified: bool,
        checked_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Store the listed zones; a non-empty set moves any non-retired IP to blacklisted.
    /// Returns false if `ip_address` is not in the fleet.
    async fn record_blacklist_check(
        &self,
        ip_address: &str,
        zones: &BTreeSet<String>,
        checked_at: DateTime<Utc>,
    ) -> Result<bool>;

}

/// SQLx implementation of SendingIpRepository.
pub struct SqlxSendingIpRepository {
    pool: SqlitePool,
}

impl SqlxSendingIpRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SendingIpRepository for SqlxSendingIpRepository {
    async fn get_ip(&self, id: &str) -> Result<SendingIpDbModel> {
        sqlx::query_as::<_, SendingIpDbModel>("SELECT * FROM sending_ips WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("SendingIp", id))
    }

    async fn get_ip_by_address(&self, ip_address: &str) -> Result<SendingIpDbModel> {
        sqlx::query_as::<_, SendingIpDbModel>("SELECT * FROM sending_ips WHERE ip_address = ?")
            .bind(ip_address)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("SendingIp", ip_address))
    }

    async fn list_ips(&self) -> Result<Vec<SendingIpDbModel>> {
        let ips = sqlx::query_as::<_, SendingIpDbModel>(
            "SELECT * FROM sending_ips ORDER BY ip_address",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ips)
    }

    async fn list_ips_by_status(&self, status: IpStatus) -> Result<Vec<SendingIpDbModel>> {
        let ips = sqlx::query_as::<_, SendingIpDbModel>(
            "SELECT * FROM sending_ips WHERE status = ? ORDER BY ip_address",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(ips)
    }

    async fn list_ips_for_health_check(&self) -> Result<Vec<SendingIpDbModel>> {
        let ips = sqlx::query_as::<_, SendingIpDbModel>(
            r#"
            SELECT * FROM sending_ips
            ORDER BY COALESCE(rdns_last_checked, 0) ASC, ip_address ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ips
            .into_iter()
            .filter(|ip| ip.status().is_some_and(|s| s.is_monitored()))
            .collect())
    }

    async fn create_ip(&self, ip: &SendingIpDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sending_ips (
                id, ip_address, hostname, status, warmup_day, warmup_daily_limit,
                warmup_stage, warmup_started_at, total_sent, total_delivered,
                total_bounced, total_complained, blacklisted_on, rdns_verified,
                rdns_last_checked, last_blacklist_check, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&ip.id)
        .bind(&ip.ip_address)
        .bind(&ip.hostname)
        .bind(&ip.status)
        .bind(ip.warmup_day)
        .bind(ip.warmup_daily_limit)
        .bind(&ip.warmup_stage)
        .bind(ip.warmup_started_at)
        .bind(ip.total_sent)
        .bind(ip.total_delivered)
        .bind(ip.total_bounced)
        .bind(ip.total_complained)
        .bind(&ip.blacklisted_on)
        .bind(ip.rdns_verified)
        .bind(ip.rdns_last_checked)
        .bind(ip.last_blacklist_check)
        .bind(ip.created_at)
        .bind(ip.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        from: IpStatus,
        to: IpStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sending_ips SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(datetime_to_ms(now))
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn advance_warmup_day(
        &self,
        id: &str,
        day: i64,
        daily_limit: i64,
        stage: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sending_ips
            SET warmup_day = ?, warmup_daily_limit = ?, warmup_stage = ?, updated_at = ?
            WHERE id = ? AND status = 'warmup' AND warmup_day < ?
            "#,
        )
        .bind(day)
        .bind(daily_limit)
        .bind(stage)
        .bind(datetime_to_ms(now))
        .bind(id)
        .bind(day)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn graduate_ips(
        &self,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sending_ips
            SET status = 'active', warmup_stage = 'established', updated_at = ?
            WHERE status = 'warmup'
              AND warmup_day >= 30
              AND warmup_started_at IS NOT NULL
              AND warmup_started_at < ?
            "#,
        )
        .bind(datetime_to_ms(now))
        .bind(datetime_to_ms(started_before))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn record_dns_check(
        &self,
        ip_address: &str,
        rdns_verified: bool,
        checked_at: DateTime<Utc>,
    ) -> Result<bool> {
        let checked_ms = datetime_to_ms(checked_at);
        let result = sqlx::query(
            "UPDATE sending_ips SET rdns_verified = ?, rdns_last_checked = ?, updated_at = ? WHERE ip_address = ?",
        )
        .bind(rdns_verified)
        .bind(checked_ms)
        .bind(checked_ms)
        .bind(ip_address)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_blacklist_check(
        &self,
        ip_address: &str,
        zones: &BTreeSet<String>,
        checked_at: DateTime<Utc>,
    ) -> Result<bool> {
        let zones_json = json::to_string_or_fallback(
            zones,
            "[]",
            JsonContext::IpField {
                ip: ip_address,
                field: "blacklisted_on",
            },
            "Failed to serialize blacklist zones",
        );
        let checked_ms = datetime_to_ms(checked_at);
        let result = sqlx::query(
            r#"
            UPDATE sending_ips
            SET blacklisted_on = ?,
                last_blacklist_check = ?,
                updated_at = ?,
                status = CASE WHEN ? AND status != 'retired' THEN 'blacklisted' ELSE status END
            WHERE ip_address = ?
            "#,
        )
        .bind(zones_json)
        .bind(checked_ms)
        .bind(checked_ms)
        .bind(!zones.is_empty())
        .bind(ip_address)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
