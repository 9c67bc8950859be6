mod common;

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use ipwarm::database::models::{IpStatus, WarmupActuals, WarmupLogStatus};
use ipwarm::database::repositories::{
    AccountingBatch, AccountingLedgerRepository, DatedActuals, SendingIpRepository,
    WarmupLogRepository,
};
use ipwarm::database::time::date_key;
use ipwarm::warmup::{WarmupConfig, WarmupScheduler};
use tokio_util::sync::CancellationToken;

use common::{insert_subscriber, insert_warming_ip, repos, setup_test_db};

fn scheduler(pool: &ipwarm::database::DbPool) -> (WarmupScheduler, common::Repos) {
    let r = repos(pool);
    let scheduler = WarmupScheduler::new(
        r.ips.clone(),
        r.logs.clone(),
        pool.clone(),
        WarmupConfig::default(),
        CancellationToken::new(),
    );
    (scheduler, r)
}

/// Credit a day's sends to a warming IP through the ledger.
async fn record_day(
    r: &common::Repos,
    address: &str,
    date: &str,
    sent: i64,
    bounced: i64,
    complained: i64,
    now: chrono::DateTime<Utc>,
) {
    let batch = AccountingBatch {
        actuals: vec![DatedActuals {
            ip_address: address.to_string(),
            date: date.to_string(),
            actuals: WarmupActuals {
                sent,
                bounced,
                complained,
            },
        }],
        ..Default::default()
    };
    r.ledger.apply_batch(&batch, now).await.unwrap();
}

#[tokio::test]
async fn advances_day_limit_and_stage_from_start_time() {
    let pool = setup_test_db().await;
    let (scheduler, r) = scheduler(&pool);
    let now = Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap();

    // 9 days and 1 hour in: day 10.
    let ip = insert_warming_ip(
        &r.ips,
        "203.0.113.10",
        "mta1.example.com",
        now - Duration::hours(9 * 24 + 1),
    )
    .await;

    assert_eq!(scheduler.advance_warmup_days(now).await.unwrap(), 1);
    let stored = r.ips.get_ip(&ip.id).await.unwrap();
    assert_eq!(stored.warmup_day, 10);
    assert_eq!(stored.warmup_daily_limit, 500);
    assert_eq!(stored.warmup_stage, "building");

    // Same instant again is a no-op.
    assert_eq!(scheduler.advance_warmup_days(now).await.unwrap(), 0);
}

#[tokio::test]
async fn day_is_capped_at_thirty_and_never_moves_back() {
    let pool = setup_test_db().await;
    let (scheduler, r) = scheduler(&pool);
    let now = Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap();

    let ip = insert_warming_ip(
        &r.ips,
        "203.0.113.11",
        "mta2.example.com",
        now - Duration::days(45),
    )
    .await;
    scheduler.advance_warmup_days(now).await.unwrap();
    let stored = r.ips.get_ip(&ip.id).await.unwrap();
    assert_eq!(stored.warmup_day, 30);
    assert_eq!(stored.warmup_daily_limit, 25_000);
    assert_eq!(stored.warmup_stage, "maturing");

    // A clock that went backwards must not rewind the day.
    assert_eq!(
        scheduler
            .advance_warmup_days(now - Duration::days(40))
            .await
            .unwrap(),
        0
    );
    assert_eq!(r.ips.get_ip(&ip.id).await.unwrap().warmup_day, 30);
}

#[tokio::test]
async fn ensure_today_log_entries_is_idempotent() {
    let pool = setup_test_db().await;
    let (scheduler, r) = scheduler(&pool);
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

    let a = insert_warming_ip(&r.ips, "203.0.113.20", "a.example.com", now).await;
    let b = insert_warming_ip(&r.ips, "203.0.113.21", "b.example.com", now).await;

    assert_eq!(scheduler.ensure_today_log_entries(now).await.unwrap(), 2);
    assert_eq!(scheduler.ensure_today_log_entries(now).await.unwrap(), 2);

    let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM warmup_log WHERE date = ?")
        .bind(date_key(now))
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 2);

    for ip in [&a, &b] {
        let entry = r.logs.get_entry(&ip.id, "2024-06-01").await.unwrap().unwrap();
        assert_eq!(entry.status(), Some(WarmupLogStatus::InProgress));
        assert_eq!(entry.planned_volume, 50);
        assert_eq!(entry.warmup_day, 1);
    }
}

#[tokio::test]
async fn breach_pauses_ip_and_fails_todays_log() {
    let pool = setup_test_db().await;
    let (scheduler, r) = scheduler(&pool);
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 18, 0, 0).unwrap();
    let today = date_key(now);

    let bad = insert_warming_ip(&r.ips, "203.0.113.30", "bad.example.com", now).await;
    let ok = insert_warming_ip(&r.ips, "203.0.113.31", "ok.example.com", now).await;
    let small = insert_warming_ip(&r.ips, "203.0.113.32", "small.example.com", now).await;

    // 5% bounces.
    record_day(&r, &bad.ip_address, &today, 100, 5, 0, now).await;
    // Exactly at the bounce threshold is not a breach.
    record_day(&r, &ok.ip_address, &today, 100, 3, 0, now).await;
    // Too few sends to judge.
    record_day(&r, &small.ip_address, &today, 10, 5, 1, now).await;

    assert_eq!(scheduler.check_thresholds(now).await.unwrap(), 1);

    let paused = r.ips.get_ip(&bad.id).await.unwrap();
    assert_eq!(paused.status(), Some(IpStatus::Paused));
    let entry = r.logs.get_entry(&bad.id, &today).await.unwrap().unwrap();
    assert_eq!(entry.status(), Some(WarmupLogStatus::Failed));
    let notes = entry.notes.unwrap();
    assert!(notes.contains("bounce rate"), "{notes}");
    assert!(!notes.contains("complaint rate"), "{notes}");

    for id in [&ok.id, &small.id] {
        assert_eq!(
            r.ips.get_ip(id).await.unwrap().status(),
            Some(IpStatus::Warmup)
        );
    }

    // A paused IP is no longer warming, so a second pass changes nothing.
    assert_eq!(scheduler.check_thresholds(now).await.unwrap(), 0);
}

#[tokio::test]
async fn complaint_breach_names_complaint_threshold() {
    let pool = setup_test_db().await;
    let (scheduler, r) = scheduler(&pool);
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 18, 0, 0).unwrap();
    let today = date_key(now);

    let ip = insert_warming_ip(&r.ips, "203.0.113.40", "fbl.example.com", now).await;
    record_day(&r, &ip.ip_address, &today, 1000, 0, 2, now).await;

    assert_eq!(scheduler.check_thresholds(now).await.unwrap(), 1);
    let notes = r
        .logs
        .get_entry(&ip.id, &today)
        .await
        .unwrap()
        .unwrap()
        .notes
        .unwrap();
    assert!(notes.contains("complaint rate"), "{notes}");
}

#[tokio::test]
async fn failed_log_is_not_reopened_by_ensure() {
    let pool = setup_test_db().await;
    let (scheduler, r) = scheduler(&pool);
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 18, 0, 0).unwrap();
    let today = date_key(now);

    let ip = insert_warming_ip(&r.ips, "203.0.113.41", "x.example.com", now).await;
    record_day(&r, &ip.ip_address, &today, 50, 20, 0, now).await;
    scheduler.check_thresholds(now).await.unwrap();

    // Resume and tick again the same day.
    r.ips
        .update_status(&ip.id, IpStatus::Paused, IpStatus::Warmup, now)
        .await
        .unwrap();
    scheduler.ensure_today_log_entries(now).await.unwrap();

    let entry = r.logs.get_entry(&ip.id, &today).await.unwrap().unwrap();
    assert_eq!(entry.status(), Some(WarmupLogStatus::Failed));
}

#[tokio::test]
async fn graduation_requires_last_day_and_thirty_days_elapsed() {
    let pool = setup_test_db().await;
    let (scheduler, r) = scheduler(&pool);
    let now = Utc.with_ymd_and_hms(2024, 7, 15, 0, 0, 0).unwrap();

    let done = insert_warming_ip(
        &r.ips,
        "203.0.113.50",
        "done.example.com",
        now - Duration::days(31),
    )
    .await;
    let young = insert_warming_ip(
        &r.ips,
        "203.0.113.51",
        "young.example.com",
        now - Duration::days(5),
    )
    .await;

    let report = scheduler.tick_at(now).await;
    assert_eq!(report.advanced, 2);
    assert_eq!(report.graduated, 1);
    assert!(report.failed_phases.is_empty());

    let graduated = r.ips.get_ip(&done.id).await.unwrap();
    assert_eq!(graduated.status(), Some(IpStatus::Active));
    assert_eq!(graduated.warmup_stage, "established");
    assert_eq!(graduated.warmup_day, 30);

    let still = r.ips.get_ip(&young.id).await.unwrap();
    assert_eq!(still.status(), Some(IpStatus::Warmup));
    assert_eq!(still.warmup_day, 6);
}

#[tokio::test]
async fn failing_phase_is_skipped_and_later_phases_still_run() {
    let pool = setup_test_db().await;
    let (scheduler, r) = scheduler(&pool);
    let now = Utc.with_ymd_and_hms(2024, 7, 15, 0, 0, 0).unwrap();

    let done = insert_warming_ip(
        &r.ips,
        "203.0.113.55",
        "done.example.com",
        now - Duration::days(31),
    )
    .await;
    let young = insert_warming_ip(
        &r.ips,
        "203.0.113.56",
        "young.example.com",
        now - Duration::days(5),
    )
    .await;

    // Both log phases depend on this table.
    sqlx::query("DROP TABLE warmup_log")
        .execute(&pool)
        .await
        .unwrap();

    let report = scheduler.tick_at(now).await;
    assert_eq!(
        report.failed_phases,
        vec!["check_thresholds", "ensure_today_log_entries"]
    );
    assert_eq!(report.advanced, 2);
    assert_eq!(report.paused, 0);
    assert_eq!(report.log_entries, 0);
    assert_eq!(report.graduated, 1);

    let graduated = r.ips.get_ip(&done.id).await.unwrap();
    assert_eq!(graduated.status(), Some(IpStatus::Active));
    assert_eq!(r.ips.get_ip(&young.id).await.unwrap().warmup_day, 6);
}

#[tokio::test]
async fn tick_creates_log_rows_for_warming_ips_only() {
    let pool = setup_test_db().await;
    let (scheduler, r) = scheduler(&pool);
    let now = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();

    let warming = insert_warming_ip(
        &r.ips,
        "203.0.113.60",
        "w.example.com",
        now - Duration::days(2),
    )
    .await;
    let paused = insert_warming_ip(&r.ips, "203.0.113.61", "p.example.com", now).await;
    r.ips
        .update_status(&paused.id, IpStatus::Warmup, IpStatus::Paused, now)
        .await
        .unwrap();

    let report = scheduler.tick_at(now).await;
    assert_eq!(report.log_entries, 1);

    let entry = r
        .logs
        .get_entry(&warming.id, "2024-06-03")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.warmup_day, 3);
    assert_eq!(entry.planned_volume, 100);
    assert!(r.logs.get_entry(&paused.id, "2024-06-03").await.unwrap().is_none());
}

#[tokio::test]
async fn recipient_tiers_follow_warmup_day() {
    let pool = setup_test_db().await;
    let (scheduler, _r) = scheduler(&pool);

    insert_subscriber(&pool, "s1", 0.90, "import", "confirmed").await;
    insert_subscriber(&pool, "s2", 0.60, "import", "confirmed").await;
    insert_subscriber(&pool, "s3", 0.30, "import", "confirmed").await;
    insert_subscriber(&pool, "s4", 0.10, "jvc-warmup", "confirmed").await;
    insert_subscriber(&pool, "s5", 0.99, "import", "unsubscribed").await;

    let ids = |rs: Vec<ipwarm::warmup::WarmupRecipient>| {
        rs.into_iter().map(|r| r.id).collect::<Vec<_>>()
    };

    let seed = scheduler.select_warmup_recipients(3, 100).await.unwrap();
    assert_eq!(ids(seed), vec!["s1", "s4"]);

    let validate = scheduler.select_warmup_recipients(10, 100).await.unwrap();
    assert_eq!(ids(validate), vec!["s1", "s2"]);

    let expand = scheduler.select_warmup_recipients(20, 100).await.unwrap();
    assert_eq!(ids(expand), vec!["s1", "s2", "s3"]);

    let all = scheduler.select_warmup_recipients(25, 100).await.unwrap();
    assert_eq!(ids(all), vec!["s1", "s2", "s3", "s4"]);

    let capped = scheduler.select_warmup_recipients(25, 2).await.unwrap();
    assert_eq!(ids(capped), vec!["s1", "s2"]);
}

#[tokio::test]
async fn start_and_stop() {
    let pool = setup_test_db().await;
    let r = repos(&pool);
    let scheduler = Arc::new(WarmupScheduler::new(
        r.ips.clone(),
        r.logs.clone(),
        pool.clone(),
        WarmupConfig::default(),
        CancellationToken::new(),
    ));

    let handle = scheduler.clone().start();
    scheduler.stop();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
