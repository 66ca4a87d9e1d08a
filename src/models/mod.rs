use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub use crate::fiscal_calendar::FiscalPeriod;

/// Sentinel persisted in the version ledger for periods the portal says were never filed
pub const NOT_FILED_TAG: &str = "NDF";

/// Exchange ticker symbol, e.g. "2330"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticker(String);

impl Ticker {
    pub fn new(symbol: impl Into<String>) -> Self {
        Ticker(symbol.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Ticker {
    fn from(symbol: &str) -> Self {
        Ticker::new(symbol)
    }
}

/// Listed company as imported from the exchange listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub ticker: Ticker,
    pub name: String,
}

/// Financial statement families published by the disclosure portal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum ReportKind {
    BalanceSheet,
    IncomeStatement,
    CashFlow,
}

impl ReportKind {
    pub const ALL: [ReportKind; 3] = [
        ReportKind::BalanceSheet,
        ReportKind::IncomeStatement,
        ReportKind::CashFlow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::BalanceSheet => "balance_sheet",
            ReportKind::IncomeStatement => "income_statement",
            ReportKind::CashFlow => "cash_flow",
        }
    }

    /// Path segment of the MOPS ajax endpoint serving this statement
    pub fn endpoint_path(&self) -> &'static str {
        match self {
            ReportKind::BalanceSheet => "ajax_t164sb03",
            ReportKind::IncomeStatement => "ajax_t164sb04",
            ReportKind::CashFlow => "ajax_t164sb05",
        }
    }

    /// Whether an extraction schema exists for this kind
    pub fn is_supported(&self) -> bool {
        matches!(self, ReportKind::BalanceSheet)
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "balance_sheet" => Ok(ReportKind::BalanceSheet),
            "income_statement" => Ok(ReportKind::IncomeStatement),
            "cash_flow" => Ok(ReportKind::CashFlow),
            other => Err(format!("unknown report kind: {}", other)),
        }
    }
}

/// Ledger state of one (ticker, kind, period) slot. An absent entry means unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionTag {
    /// Stored under this extraction schema version
    Version(String),
    /// The portal confirmed nothing was filed for the period
    NotFiled,
}

impl VersionTag {
    pub fn version(v: impl Into<String>) -> Self {
        VersionTag::Version(v.into())
    }

    pub fn is_not_filed(&self) -> bool {
        matches!(self, VersionTag::NotFiled)
    }

    pub fn is_version(&self, supported: &str) -> bool {
        matches!(self, VersionTag::Version(v) if v == supported)
    }

    pub fn as_str(&self) -> &str {
        match self {
            VersionTag::Version(v) => v,
            VersionTag::NotFiled => NOT_FILED_TAG,
        }
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for VersionTag {
    fn from(raw: &str) -> Self {
        if raw == NOT_FILED_TAG {
            VersionTag::NotFiled
        } else {
            VersionTag::Version(raw.to_string())
        }
    }
}

/// Per (ticker, kind) map from fiscal period to its ledger tag
pub type VersionLedger = BTreeMap<FiscalPeriod, VersionTag>;

/// Normalized statement fields keyed by the portal's row label
pub type ReportFields = BTreeMap<String, f64>;

/// One stored financial statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub ticker: Ticker,
    pub fiscal_period: FiscalPeriod,
    pub report_kind: ReportKind,
    pub version: String,
    pub fields: ReportFields,
}

/// Unit of work for the worker pool
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchJob {
    pub ticker: Ticker,
    pub fiscal_period: FiscalPeriod,
    pub report_kind: ReportKind,
}

impl FetchJob {
    pub fn new(ticker: Ticker, fiscal_period: FiscalPeriod, report_kind: ReportKind) -> Self {
        Self {
            ticker,
            fiscal_period,
            report_kind,
        }
    }
}

impl fmt::Display for FetchJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.ticker, self.report_kind, self.fiscal_period)
    }
}
