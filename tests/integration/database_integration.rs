//! SQLite store integration tests

use pretty_assertions::assert_eq;
use report_sync::database::{CreateOutcome, ReportStore};
use report_sync::database_sqlx::DatabaseManagerSqlx;
use report_sync::fiscal_calendar::FiscalCalendar;
use report_sync::models::{Company, ReportFields, ReportKind, ReportRecord, Ticker, VersionTag};
use report_sync::version_reconciler::VersionReconciler;
use std::sync::Arc;
use test_log::test;

use crate::common::logging::{log_test_data, log_test_step};
use crate::common::test_data::{date, period};
use crate::common::TestDatabase;

fn record(ticker: &str, year: i32, quarter: u8) -> ReportRecord {
    let fields: ReportFields = [("資產總額".to_string(), 4_964_778_878.0), ("庫藏股票".to_string(), -1234.0)]
        .into_iter()
        .collect();
    ReportRecord {
        ticker: Ticker::new(ticker),
        fiscal_period: period(year, quarter),
        report_kind: ReportKind::BalanceSheet,
        version: "v1".to_string(),
        fields,
    }
}

#[test(tokio::test)]
async fn test_ledger_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let path = path.to_string_lossy();
    let ticker = Ticker::new("2330");

    {
        let manager = DatabaseManagerSqlx::new(&path).await.unwrap();
        manager
            .upsert_version(&ticker, ReportKind::BalanceSheet, period(111, 4), VersionTag::version("v1"))
            .await
            .unwrap();
        manager
            .upsert_version(&ticker, ReportKind::BalanceSheet, period(111, 3), VersionTag::NotFiled)
            .await
            .unwrap();
    }

    log_test_step("reopening the database file");
    let manager = DatabaseManagerSqlx::new(&path).await.unwrap();
    let ledger = manager
        .get_version_table(&ticker, ReportKind::BalanceSheet)
        .await
        .unwrap();
    log_test_data("ledger", &ledger);

    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger.get(&period(111, 4)), Some(&VersionTag::version("v1")));
    assert_eq!(ledger.get(&period(111, 3)), Some(&VersionTag::NotFiled));
}

#[test(tokio::test)]
async fn test_duplicate_report_is_conflict_and_kept_once() {
    let db = TestDatabase::new().await.unwrap();
    let report = record("2330", 111, 4);

    assert_eq!(db.manager.create_report(&report).await.unwrap(), CreateOutcome::Created);
    assert_eq!(db.manager.create_report(&report).await.unwrap(), CreateOutcome::Conflict);

    let stored = db
        .manager
        .get_report(&report.ticker, ReportKind::BalanceSheet, period(111, 4))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, report);
}

#[test(tokio::test)]
async fn test_company_upsert_renames() {
    let db = TestDatabase::new().await.unwrap();
    let ticker = Ticker::new("2330");

    for name in ["台積電", "台灣積體電路製造"] {
        db.manager
            .upsert_company(&Company {
                ticker: ticker.clone(),
                name: name.to_string(),
            })
            .await
            .unwrap();
    }

    let companies = db.manager.list_companies().await.unwrap();
    assert_eq!(companies, vec![ticker]);
    assert_eq!(db.manager.get_companies().await.unwrap()[0].name, "台灣積體電路製造");
}

#[test(tokio::test)]
async fn test_deleted_report_is_planned_again() {
    let db = TestDatabase::with_companies(&["2330"]).await.unwrap();
    let calendar = FiscalCalendar::new(1911, period(111, 3));
    let store: Arc<dyn ReportStore> = db.manager.clone();
    let reconciler = VersionReconciler::new(store, calendar, vec![(ReportKind::BalanceSheet, "v1".to_string())]);
    let ticker = Ticker::new("2330");

    for quarter in [4, 3] {
        db.manager.create_report(&record("2330", 111, quarter)).await.unwrap();
        db.manager
            .upsert_version(&ticker, ReportKind::BalanceSheet, period(111, quarter), VersionTag::version("v1"))
            .await
            .unwrap();
    }
    let today = date(2023, 2, 15);
    assert!(reconciler.plan_sweep(today).await.unwrap().jobs.is_empty());

    log_test_step("deleting 111Q3 clears its ledger slot");
    let deleted = db
        .manager
        .delete_report(&ticker, ReportKind::BalanceSheet, period(111, 3))
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    let plan = reconciler.plan_sweep(today).await.unwrap();
    let periods: Vec<_> = plan.jobs.iter().map(|job| job.fiscal_period).collect();
    assert_eq!(periods, vec![period(111, 3)]);
}
