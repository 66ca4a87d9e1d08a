//! Statement page extraction
//!
//! Pure functions from fetched page bytes to normalized report fields. No I/O.

pub mod balance_sheet;
pub mod table;

use crate::error::ExtractError;
use crate::models::{FiscalPeriod, ReportFields, ReportKind};

/// Extract the fields of a `kind` statement for `period` from a fetched page.
///
/// Only balance sheets have a schema; other kinds fail with
/// [`ExtractError::UnsupportedKind`] without looking at the page.
pub fn extract(raw: &[u8], period: FiscalPeriod, kind: ReportKind) -> Result<ReportFields, ExtractError> {
    match kind {
        ReportKind::BalanceSheet => {
            let html = std::str::from_utf8(raw).map_err(|_| ExtractError::NotUtf8)?;
            balance_sheet::extract(html, period)
        }
        ReportKind::IncomeStatement | ReportKind::CashFlow => Err(ExtractError::UnsupportedKind(kind)),
    }
}
