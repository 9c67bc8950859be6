//! MTA-side versus platform-side delivery reconciliation.
//!
//! MTA totals come from the lifetime counters on `sending_ips`; platform totals
//! are counted from `tracking_events` recorded through MTA-backed sending
//! profiles. A side whose query fails is read as zero and the failure is logged,
//! so a report is always produced.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use tracing::warn;

use crate::Result;
use crate::database::time::datetime_to_ms;

/// `sending_profiles.vendor_type` of profiles that send through the MTA.
pub const MTA_VENDOR_TYPE: &str = "pmta";

/// Metrics compared between the two sides.
const COMPARED_METRICS: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, FromRow)]
pub struct DeliveryTotals {
    pub sent: i64,
    pub delivered: i64,
    pub bounced: i64,
    pub complained: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discrepancy {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub metric: &'static str,
    pub pmta_value: i64,
    pub platform_value: i64,
    /// `pmta_value - platform_value`
    pub difference: i64,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub period: ReportPeriod,
    pub pmta_totals: DeliveryTotals,
    pub platform_totals: DeliveryTotals,
    pub discrepancies: Vec<Discrepancy>,
    /// Percentage of compared metrics that agree, two decimals.
    pub match_rate: f64,
}

/// MTA-side counters and rates for one IP.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IpReconciliation {
    pub ip_address: String,
    pub status: String,
    pub sent: i64,
    pub delivered: i64,
    pub bounced: i64,
    pub delivery_rate: f64,
    pub bounce_rate: f64,
}

#[derive(FromRow)]
struct IpTotalsRow {
    ip_address: String,
    status: String,
    total_sent: i64,
    total_delivered: i64,
    total_bounced: i64,
}

/// Compare two sides metric by metric, in delivered, bounced, complained order.
pub fn compare_totals(pmta: &DeliveryTotals, platform: &DeliveryTotals) -> Vec<Discrepancy> {
    let metrics = [
        (
            "delivered",
            "delivery_count_mismatch",
            pmta.delivered,
            platform.delivered,
            "Delivered count mismatch: tracking events may be missing or delayed",
        ),
        (
            "bounced",
            "bounce_count_mismatch",
            pmta.bounced,
            platform.bounced,
            "Bounce count mismatch: accounting may have records not yet ingested",
        ),
        (
            "complained",
            "complaint_count_mismatch",
            pmta.complained,
            platform.complained,
            "Complaint count mismatch: feedback loop reports may not be processed",
        ),
    ];

    metrics
        .into_iter()
        .filter(|(_, _, pmta_value, platform_value, _)| pmta_value != platform_value)
        .map(
            |(metric, kind, pmta_value, platform_value, description)| Discrepancy {
                kind,
                metric,
                pmta_value,
                platform_value,
                difference: pmta_value - platform_value,
                description,
            },
        )
        .collect()
}

pub fn match_rate(discrepancies: usize) -> f64 {
    let matched = COMPARED_METRICS.saturating_sub(discrepancies) as f64;
    round2(matched / COMPARED_METRICS as f64 * 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn pct(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round2(part as f64 / whole as f64 * 100.0)
    }
}

pub struct ReconciliationEngine {
    pool: SqlitePool,
}

impl ReconciliationEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn reconcile(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ReconciliationReport {
        let pmta_totals = match self.pmta_totals().await {
            Ok(totals) => totals,
            Err(e) => {
                warn!(error = %e, "Failed to read MTA totals; reconciling against zero");
                DeliveryTotals::default()
            }
        };
        let platform_totals = match self.platform_totals(start, end).await {
            Ok(totals) => totals,
            Err(e) => {
                warn!(error = %e, "Failed to read platform totals; reconciling against zero");
                DeliveryTotals::default()
            }
        };

        let discrepancies = compare_totals(&pmta_totals, &platform_totals);
        let match_rate = match_rate(discrepancies.len());

        ReconciliationReport {
            period: ReportPeriod { start, end },
            pmta_totals,
            platform_totals,
            discrepancies,
            match_rate,
        }
    }

    /// Per-IP MTA-side counters. There is no per-IP platform attribution to compare against.
    pub async fn reconcile_per_ip(&self) -> Result<Vec<IpReconciliation>> {
        let rows = sqlx::query_as::<_, IpTotalsRow>(
            r#"
            SELECT ip_address, status, total_sent, total_delivered, total_bounced
            FROM sending_ips
            WHERE status != 'retired'
            ORDER BY ip_address
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| IpReconciliation {
                delivery_rate: pct(row.total_delivered, row.total_sent),
                bounce_rate: pct(row.total_bounced, row.total_sent),
                ip_address: row.ip_address,
                status: row.status,
                sent: row.total_sent,
                delivered: row.total_delivered,
                bounced: row.total_bounced,
            })
            .collect())
    }

    async fn pmta_totals(&self) -> Result<DeliveryTotals> {
        let totals = sqlx::query_as::<_, DeliveryTotals>(
            r#"
            SELECT
                COALESCE(SUM(total_sent), 0) AS sent,
                COALESCE(SUM(total_delivered), 0) AS delivered,
                COALESCE(SUM(total_bounced), 0) AS bounced,
                COALESCE(SUM(total_complained), 0) AS complained
            FROM sending_ips
            WHERE status != 'retired'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(totals)
    }

    async fn platform_totals(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<DeliveryTotals> {
        let totals = sqlx::query_as::<_, DeliveryTotals>(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN e.event_type = 'sent' THEN 1 ELSE 0 END), 0) AS sent,
                COALESCE(SUM(CASE WHEN e.event_type = 'delivered' THEN 1 ELSE 0 END), 0) AS delivered,
                COALESCE(SUM(CASE WHEN e.event_type = 'bounced' THEN 1 ELSE 0 END), 0) AS bounced,
                COALESCE(SUM(CASE WHEN e.event_type = 'complained' THEN 1 ELSE 0 END), 0) AS complained
            FROM tracking_events e
            JOIN sending_profiles p ON p.id = e.sending_profile_id
            WHERE p.vendor_type = ?
              AND e.event_at BETWEEN ? AND ?
            "#,
        )
        .bind(MTA_VENDOR_TYPE)
        .bind(datetime_to_ms(start))
        .bind(datetime_to_ms(end))
        .fetch_one(&self.pool)
        .await?;
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_discrepancy() {
        let pmta = DeliveryTotals {
            sent: 100,
            delivered: 100,
            bounced: 0,
            complained: 0,
        };
        let platform = DeliveryTotals {
            delivered: 90,
            ..pmta
        };
        let found = compare_totals(&pmta, &platform);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metric, "delivered");
        assert_eq!(found[0].difference, 10);
        assert_eq!(match_rate(found.len()), 66.67);
    }

    #[test]
    fn test_signed_difference_and_order() {
        let pmta = DeliveryTotals {
            bounced: 5,
            complained: 1,
            ..Default::default()
        };
        let platform = DeliveryTotals {
            bounced: 8,
            complained: 0,
            ..Default::default()
        };
        let found = compare_totals(&pmta, &platform);
        let metrics: Vec<_> = found.iter().map(|d| d.metric).collect();
        assert_eq!(metrics, vec!["bounced", "complained"]);
        assert_eq!(found[0].difference, -3);
        assert!(found[0].description.contains("not yet ingested"));
    }

    #[test]
    fn test_match_rate() {
        assert_eq!(match_rate(0), 100.0);
        assert_eq!(match_rate(1), 66.67);
        assert_eq!(match_rate(2), 33.33);
        assert_eq!(match_rate(3), 0.0);
    }

    #[test]
    fn test_sent_is_not_compared() {
        let pmta = DeliveryTotals {
            sent: 10,
            ..Default::default()
        };
        assert!(compare_totals(&pmta, &DeliveryTotals::default()).is_empty());
    }
}
