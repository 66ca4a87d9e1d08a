//! Domain error types
//!
//! Orchestration code works with `anyhow::Result`; the enums here are the
//! failures callers are expected to match on.

use thiserror::Error;

use crate::models::{FiscalPeriod, ReportKind};

/// Fiscal period arithmetic and parsing failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalendarError {
    #[error("fiscal period out of range: year {year} is not a valid fiscal year")]
    OutOfRange { year: i32 },

    #[error("invalid fiscal quarter {0}, expected 1-4")]
    InvalidQuarter(u8),

    #[error("cannot parse fiscal period {0:?}, expected a form like 111Q4")]
    Unparseable(String),
}

/// Reasons a fetched disclosure page could not be turned into report fields
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("no extraction schema for report kind {0}")]
    UnsupportedKind(ReportKind),

    #[error("response body is not valid UTF-8")]
    NotUtf8,

    #[error("response contains no tables")]
    NoTables,

    #[error("no table labelled {label:?} for period {period}")]
    PeriodTableMissing { period: FiscalPeriod, label: String },

    #[error("column {column:?} not found in the statement table")]
    ColumnMissing { column: String },

    #[error("statement table has no data rows")]
    NoRows,
}

/// Invalid or missing configuration; fatal at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("report kind {0} is not supported for syncing yet")]
    UnsupportedKind(ReportKind),
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, value: impl Into<String>, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            name,
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}
