//! Common test utilities and helpers

pub mod database;
pub mod portal;

pub use database::TestDatabase;
pub use portal::FakePortal;

/// Test data utilities
pub mod test_data {
    use chrono::NaiveDate;
    use report_sync::models::FiscalPeriod;

    const BALANCE_SHEET_111Q4: &str = include_str!("../fixtures/balance_sheet_2330_111Q4.html");

    pub fn period(year: i32, quarter: u8) -> FiscalPeriod {
        FiscalPeriod::new(year, quarter).unwrap()
    }

    pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    /// A balance sheet page for `period`, built by relabelling the 111Q4 fixture
    pub fn balance_sheet_page(period: FiscalPeriod) -> String {
        let (month, day) = period.closing_month_day();
        BALANCE_SHEET_111Q4
            .replace("民國111年第4季", &format!("民國{}年第{}季", period.year(), period.quarter()))
            .replace("111年12月31日", &format!("{}年{:02}月{:02}日", period.year(), month, day))
    }

    /// The page the portal serves when nothing was filed
    pub fn not_filed_page() -> String {
        "<html><body><center><h4><font color='red'>查無所需資料！</font></h4></center></body></html>".to_string()
    }
}

/// Logging utilities for tests
pub mod logging {
    use std::sync::Once;
    use tracing::{debug, info};

    static INIT: Once = Once::new();

    /// Initialize test logging
    pub fn init_test_logging() {
        INIT.call_once(|| {
            // Only initialize if not already initialized
            let _ = tracing::subscriber::set_global_default(
                tracing_subscriber::fmt()
                    .with_env_filter("report_sync=debug,main=debug")
                    .with_test_writer()
                    .finish(),
            );
        });
    }

    /// Log test step
    pub fn log_test_step(step: &str) {
        info!("🧪 Test Step: {}", step);
    }

    /// Log test data
    pub fn log_test_data<T: std::fmt::Debug>(label: &str, data: &T) {
        debug!("📊 {}: {:?}", label, data);
    }
}
