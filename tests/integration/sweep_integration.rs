//! End-to-end sweeps against a fake portal
//!
//! Each test wires the real engine (rate limiter, MOPS client, extractor,
//! worker pool, reconciler) to a wiremock portal and a temporary database.

use pretty_assertions::assert_eq;
use report_sync::database::{InMemoryReportStore, ReportStore};
use report_sync::models::{ReportKind, Ticker, VersionTag};
use report_sync::scheduler::Scheduler;
use std::sync::Arc;
use std::time::{Duration, Instant};
use test_log::test;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::logging::log_test_step;
use crate::common::test_data::{date, not_filed_page, period};
use crate::common::{FakePortal, TestDatabase};

#[test(tokio::test)]
async fn test_fresh_company_sweep_is_idempotent() {
    let portal = FakePortal::start().await;
    let db = TestDatabase::with_companies(&["2330"]).await.unwrap();
    let config = portal.config(&[("EARLIEST_SUPPORTED_PERIOD", "111Q1")]);

    // every period is requested exactly once across both sweeps
    portal.filed("2330", period(111, 4), 1).await;
    portal.filed("2330", period(111, 3), 1).await;
    portal.filed("2330", period(111, 2), 1).await;
    portal.not_filed("2330", period(111, 1), 1).await;

    let scheduler = Scheduler::from_config(&config, db.manager.clone()).unwrap();
    let (_tx, mut shutdown) = watch::channel(false);
    // 2023-02-15 is in 112Q1, so 111Q4 is the latest closed quarter
    let today = date(2023, 2, 15);

    log_test_step("first sweep walks from 111Q4 down to the floor");
    let first = scheduler.run_sweep(today, &mut shutdown).await.unwrap();
    assert_eq!(first.planned, 4);
    assert_eq!(first.stats.stored, 3);
    assert_eq!(first.stats.not_filed, 1);
    assert_eq!(first.stats.failures(), 0);

    let ticker = Ticker::new("2330");
    let ledger = db
        .manager
        .get_version_table(&ticker, ReportKind::BalanceSheet)
        .await
        .unwrap();
    assert_eq!(ledger.get(&period(111, 4)), Some(&VersionTag::version("v1")));
    assert_eq!(ledger.get(&period(111, 2)), Some(&VersionTag::version("v1")));
    assert_eq!(ledger.get(&period(111, 1)), Some(&VersionTag::NotFiled));

    let stored = db
        .manager
        .get_report(&ticker, ReportKind::BalanceSheet, period(111, 3))
        .await
        .unwrap()
        .expect("111Q3 stored");
    assert_eq!(stored.fields.get("現金及約當現金"), Some(&1_342_814_083.0));

    log_test_step("second sweep on an unchanged ledger plans nothing");
    let second = scheduler.run_sweep(today, &mut shutdown).await.unwrap();
    assert_eq!(second.planned, 0);

    scheduler.shutdown().await;
}

#[test(tokio::test)]
async fn test_ndf_bounds_later_sweeps() {
    let portal = FakePortal::start().await;
    let db = TestDatabase::with_companies(&["6669"]).await.unwrap();
    let config = portal.config(&[("EARLIEST_SUPPORTED_PERIOD", "110Q1")]);

    // listed in 111Q3: nothing before that was ever filed
    portal.filed("6669", period(111, 4), 1).await;
    portal.filed("6669", period(111, 3), 1).await;
    for p in [(111, 2), (111, 1), (110, 4), (110, 3), (110, 2), (110, 1)] {
        portal.not_filed("6669", period(p.0, p.1), 1).await;
    }
    portal.filed("6669", period(112, 1), 1).await;

    let scheduler = Scheduler::from_config(&config, db.manager.clone()).unwrap();
    let (_tx, mut shutdown) = watch::channel(false);

    log_test_step("empty ledger: bounded over-enumeration down to the floor");
    let first = scheduler.run_sweep(date(2023, 2, 15), &mut shutdown).await.unwrap();
    assert_eq!(first.planned, 8);
    assert_eq!(first.stats.stored, 2);
    assert_eq!(first.stats.not_filed, 6);

    log_test_step("NDF at 111Q2 stops the scan");
    let second = scheduler.run_sweep(date(2023, 2, 16), &mut shutdown).await.unwrap();
    assert_eq!(second.planned, 0);

    log_test_step("a new quarter closes: only 112Q1 is fetched");
    let third = scheduler.run_sweep(date(2023, 5, 20), &mut shutdown).await.unwrap();
    assert_eq!(third.planned, 1);
    assert_eq!(third.stats.stored, 1);

    scheduler.shutdown().await;
}

#[test(tokio::test)]
async fn test_transient_failure_is_retried_next_sweep() {
    let portal = FakePortal::start().await;
    let db = TestDatabase::with_companies(&["2330"]).await.unwrap();
    let config = portal.config(&[("EARLIEST_SUPPORTED_PERIOD", "111Q4")]);

    // mounted first, so it answers the first request only
    Mock::given(method("POST"))
        .and(path("/mops/web/ajax_t164sb03"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&portal.server)
        .await;
    portal.filed("2330", period(111, 4), 1).await;

    let scheduler = Scheduler::from_config(&config, db.manager.clone()).unwrap();
    let (_tx, mut shutdown) = watch::channel(false);
    let ticker = Ticker::new("2330");

    let first = scheduler.run_sweep(date(2023, 2, 15), &mut shutdown).await.unwrap();
    assert_eq!(first.stats.transient_failures, 1);
    assert!(db
        .manager
        .get_version_table(&ticker, ReportKind::BalanceSheet)
        .await
        .unwrap()
        .is_empty());

    let second = scheduler.run_sweep(date(2023, 2, 15), &mut shutdown).await.unwrap();
    assert_eq!(second.planned, 1);
    assert_eq!(second.stats.stored, 1);

    scheduler.shutdown().await;
}

#[test(tokio::test)]
async fn test_throttled_and_drifted_pages_leave_ledger_alone() {
    let portal = FakePortal::start().await;
    let db = TestDatabase::with_companies(&["2330"]).await.unwrap();
    let config = portal.config(&[("EARLIEST_SUPPORTED_PERIOD", "111Q3")]);

    portal
        .respond(
            "2330",
            period(111, 4),
            ResponseTemplate::new(200).set_body_string("<html>Too many query requests from your ip</html>"),
            1,
        )
        .await;
    portal
        .respond(
            "2330",
            period(111, 3),
            ResponseTemplate::new(200).set_body_string("<table><tr><th>系統維護中</th></tr></table>"),
            1,
        )
        .await;

    let scheduler = Scheduler::from_config(&config, db.manager.clone()).unwrap();
    let (_tx, mut shutdown) = watch::channel(false);

    let report = scheduler.run_sweep(date(2023, 2, 15), &mut shutdown).await.unwrap();
    assert_eq!(report.stats.transient_failures, 1);
    assert_eq!(report.stats.parse_failures, 1);
    assert!(db
        .manager
        .get_version_table(&Ticker::new("2330"), ReportKind::BalanceSheet)
        .await
        .unwrap()
        .is_empty());

    scheduler.shutdown().await;
}

#[test(tokio::test)]
async fn test_requests_respect_rate_limit_across_workers() {
    let portal = FakePortal::start().await;
    let db = TestDatabase::with_companies(&["1101", "2330"]).await.unwrap();
    let config = portal.config(&[
        ("EARLIEST_SUPPORTED_PERIOD", "111Q1"),
        ("REQUESTS_PER_SECOND", "20"),
        ("WORKER_COUNT", "4"),
    ]);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(not_filed_page()))
        .expect(8)
        .mount(&portal.server)
        .await;

    let scheduler = Scheduler::from_config(&config, db.manager.clone()).unwrap();
    let (_tx, mut shutdown) = watch::channel(false);

    let start = Instant::now();
    let report = scheduler.run_sweep(date(2023, 2, 15), &mut shutdown).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(report.stats.completed, 8);
    assert_eq!(portal.request_count().await, 8);
    // 8 grants at 50ms spacing span at least 7 intervals
    assert!(elapsed >= Duration::from_millis(340), "sweep took {:?}", elapsed);

    scheduler.shutdown().await;
}

#[test(tokio::test)]
async fn test_unreadable_ledger_skips_only_that_company() {
    let portal = FakePortal::start().await;
    let store = Arc::new(InMemoryReportStore::with_companies(["1101", "2330"]));
    store.fail_ledger_reads_for(&Ticker::new("1101"));
    let config = portal.config(&[("EARLIEST_SUPPORTED_PERIOD", "111Q4")]);

    portal.filed("2330", period(111, 4), 1).await;
    portal.filed("1101", period(111, 4), 0).await;

    let scheduler = Scheduler::from_config(&config, store.clone()).unwrap();
    let (_tx, mut shutdown) = watch::channel(false);

    let report = scheduler.run_sweep(date(2023, 2, 15), &mut shutdown).await.unwrap();
    assert_eq!(report.ledgers_failed, 1);
    assert_eq!(report.planned, 1);
    assert_eq!(report.stats.stored, 1);
    assert_eq!(store.reports()[0].ticker, Ticker::new("2330"));

    scheduler.shutdown().await;
}

#[test(tokio::test)]
async fn test_shutdown_cancels_queued_jobs() {
    let portal = FakePortal::start().await;
    let db = TestDatabase::with_companies(&["2330"]).await.unwrap();
    let config = portal.config(&[("EARLIEST_SUPPORTED_PERIOD", "105Q1"), ("WORKER_COUNT", "1")]);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(not_filed_page()))
        .mount(&portal.server)
        .await;

    let scheduler = Scheduler::from_config(&config, db.manager.clone()).unwrap();
    let (tx, mut shutdown) = watch::channel(false);
    tx.send(true).unwrap();

    let report = scheduler.run_sweep(date(2023, 2, 15), &mut shutdown).await.unwrap();
    assert!(report.interrupted);
    assert!(report.stats.cancelled > 0);
    assert_eq!(report.stats.cancelled + report.stats.completed, report.planned);

    scheduler.shutdown().await;
}
