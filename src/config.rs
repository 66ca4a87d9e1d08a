use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;
use crate::fiscal_calendar::{FiscalCalendar, FiscalPeriod, DEFAULT_EARLIEST_SUPPORTED, MINGUO_YEAR_OFFSET};
use crate::models::{ReportKind, NOT_FILED_TAG};

pub const DEFAULT_MOPS_BASE_URL: &str = "https://mops.twse.com.tw/mops/web";
pub const DEFAULT_ISIN_LISTING_URL: &str = "https://isin.twse.com.tw/isin/class_main.jsp?owncode=&stockname=&isincode=&market=1&issuetype=1&industry_code=&Page=1&chklike=Y";
pub const DEFAULT_SUPPORTED_VERSION: &str = "v1";

/// Configuration for the sync engine
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub mops_base_url: String,
    pub endpoint_overrides: HashMap<ReportKind, String>,
    pub isin_listing_url: String,
    pub requests_per_second: f64,
    pub worker_count: usize,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    pub sweep_hour: u32,
    pub sweep_minute: u32,
    pub fiscal_year_offset: i32,
    pub earliest_supported_period: FiscalPeriod,
    pub report_kinds: Vec<ReportKind>,
    pub supported_versions: HashMap<ReportKind, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "reports.db".to_string(),
            mops_base_url: DEFAULT_MOPS_BASE_URL.to_string(),
            endpoint_overrides: HashMap::new(),
            isin_listing_url: DEFAULT_ISIN_LISTING_URL.to_string(),
            requests_per_second: 10.0,
            worker_count: 4,
            retry_attempts: 2,
            retry_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
            sweep_hour: 14,
            sweep_minute: 0,
            fiscal_year_offset: MINGUO_YEAR_OFFSET,
            earliest_supported_period: DEFAULT_EARLIEST_SUPPORTED,
            report_kinds: vec![ReportKind::BalanceSheet],
            supported_versions: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if it exists
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from any variable source. Unset variables take
    /// their defaults; set but malformed ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mops_base_url = match var("MOPS_BASE_URL") {
            Some(raw) => checked_url("MOPS_BASE_URL", raw)?,
            None => defaults.mops_base_url,
        };

        let mut endpoint_overrides = HashMap::new();
        for kind in ReportKind::ALL {
            let name = endpoint_var(kind);
            if let Some(raw) = var(name) {
                endpoint_overrides.insert(kind, checked_url(name, raw)?);
            }
        }

        let isin_listing_url = match var("ISIN_LISTING_URL") {
            Some(raw) => checked_url("ISIN_LISTING_URL", raw)?,
            None => defaults.isin_listing_url,
        };

        let requests_per_second: f64 = parsed(&var, "REQUESTS_PER_SECOND", defaults.requests_per_second)?;
        if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
            return Err(ConfigError::invalid(
                "REQUESTS_PER_SECOND",
                requests_per_second.to_string(),
                "must be a positive number",
            ));
        }

        let worker_count: usize = parsed(&var, "WORKER_COUNT", defaults.worker_count)?;
        if worker_count == 0 {
            return Err(ConfigError::invalid("WORKER_COUNT", "0", "at least one worker is required"));
        }

        let retry_attempts: u32 = parsed(&var, "RETRY_ATTEMPTS", defaults.retry_attempts)?;
        if retry_attempts == 0 {
            return Err(ConfigError::invalid("RETRY_ATTEMPTS", "0", "at least one attempt is required"));
        }

        let retry_delay = Duration::from_secs(parsed(&var, "RETRY_DELAY_SECS", defaults.retry_delay.as_secs())?);
        let request_timeout =
            Duration::from_secs(parsed(&var, "REQUEST_TIMEOUT_SECS", defaults.request_timeout.as_secs())?);

        let sweep_hour: u32 = parsed(&var, "SWEEP_HOUR", defaults.sweep_hour)?;
        if sweep_hour > 23 {
            return Err(ConfigError::invalid("SWEEP_HOUR", sweep_hour.to_string(), "must be 0-23"));
        }
        let sweep_minute: u32 = parsed(&var, "SWEEP_MINUTE", defaults.sweep_minute)?;
        if sweep_minute > 59 {
            return Err(ConfigError::invalid("SWEEP_MINUTE", sweep_minute.to_string(), "must be 0-59"));
        }

        let fiscal_year_offset: i32 = parsed(&var, "FISCAL_YEAR_OFFSET", defaults.fiscal_year_offset)?;
        let earliest_supported_period = match var("EARLIEST_SUPPORTED_PERIOD") {
            Some(raw) => FiscalPeriod::from_str(&raw)
                .map_err(|e| ConfigError::invalid("EARLIEST_SUPPORTED_PERIOD", raw, e))?,
            None => defaults.earliest_supported_period,
        };

        let report_kinds = match var("REPORT_KINDS") {
            Some(raw) => parse_report_kinds(&raw)?,
            None => defaults.report_kinds,
        };

        let mut supported_versions = HashMap::new();
        for kind in ReportKind::ALL {
            let name = version_var(kind);
            if let Some(version) = var(name) {
                if version == NOT_FILED_TAG {
                    return Err(ConfigError::invalid(name, version, "NDF is reserved for unfiled periods"));
                }
                supported_versions.insert(kind, version);
            }
        }

        Ok(Config {
            database_path: var("DATABASE_PATH").unwrap_or(defaults.database_path),
            mops_base_url,
            endpoint_overrides,
            isin_listing_url,
            requests_per_second,
            worker_count,
            retry_attempts,
            retry_delay,
            request_timeout,
            sweep_hour,
            sweep_minute,
            fiscal_year_offset,
            earliest_supported_period,
            report_kinds,
            supported_versions,
        })
    }

    /// MOPS endpoint serving `kind`
    pub fn endpoint_for(&self, kind: ReportKind) -> String {
        self.endpoint_overrides.get(&kind).cloned().unwrap_or_else(|| {
            format!("{}/{}", self.mops_base_url.trim_end_matches('/'), kind.endpoint_path())
        })
    }

    /// Extraction schema version a stored `kind` report must carry to count as current
    pub fn supported_version(&self, kind: ReportKind) -> &str {
        self.supported_versions
            .get(&kind)
            .map(String::as_str)
            .unwrap_or(DEFAULT_SUPPORTED_VERSION)
    }

    pub fn calendar(&self) -> FiscalCalendar {
        FiscalCalendar::new(self.fiscal_year_offset, self.earliest_supported_period)
    }
}

fn endpoint_var(kind: ReportKind) -> &'static str {
    match kind {
        ReportKind::BalanceSheet => "MOPS_BALANCE_SHEET_URL",
        ReportKind::IncomeStatement => "MOPS_INCOME_STATEMENT_URL",
        ReportKind::CashFlow => "MOPS_CASH_FLOW_URL",
    }
}

fn version_var(kind: ReportKind) -> &'static str {
    match kind {
        ReportKind::BalanceSheet => "REPORT_VERSION_BALANCE_SHEET",
        ReportKind::IncomeStatement => "REPORT_VERSION_INCOME_STATEMENT",
        ReportKind::CashFlow => "REPORT_VERSION_CASH_FLOW",
    }
}

fn parsed<T, V>(var: &V, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::invalid(name, raw.clone(), e)),
        None => Ok(default),
    }
}

fn checked_url(name: &'static str, raw: String) -> Result<String, ConfigError> {
    match Url::parse(&raw) {
        Ok(_) => Ok(raw),
        Err(e) => Err(ConfigError::invalid(name, raw, e)),
    }
}

fn parse_report_kinds(raw: &str) -> Result<Vec<ReportKind>, ConfigError> {
    let mut kinds = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let kind = ReportKind::from_str(part).map_err(|e| ConfigError::invalid("REPORT_KINDS", raw, e))?;
        if !kind.is_supported() {
            return Err(ConfigError::UnsupportedKind(kind));
        }
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    if kinds.is_empty() {
        return Err(ConfigError::invalid("REPORT_KINDS", raw, "no report kinds listed"));
    }
    Ok(kinds)
}
