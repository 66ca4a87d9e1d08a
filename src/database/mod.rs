//! Storage adapter seam
//!
//! The engine talks to persistence only through [`ReportStore`]. The SQLite
//! adapter lives in `database_sqlx`; [`InMemoryReportStore`] backs tests and
//! dry runs.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;

use crate::models::{FiscalPeriod, ReportKind, ReportRecord, Ticker, VersionLedger, VersionTag};

/// Result of inserting a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// A report for the same slot and version already exists
    Conflict,
}

/// Persistence used by the sync engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Every ticker in the company universe
    async fn list_companies(&self) -> Result<Vec<Ticker>>;

    /// The version ledger of one (ticker, kind)
    async fn get_version_table(&self, ticker: &Ticker, kind: ReportKind) -> Result<VersionLedger>;

    async fn create_report(&self, record: &ReportRecord) -> Result<CreateOutcome>;

    /// Point upsert of one ledger slot
    async fn upsert_version(
        &self,
        ticker: &Ticker,
        kind: ReportKind,
        period: FiscalPeriod,
        tag: VersionTag,
    ) -> Result<()>;
}

type SlotKey = (Ticker, ReportKind, FiscalPeriod);

#[derive(Default)]
struct MemoryState {
    companies: BTreeSet<Ticker>,
    ledgers: BTreeMap<(Ticker, ReportKind), VersionLedger>,
    reports: BTreeMap<(SlotKey, String), ReportRecord>,
    unreadable_ledgers: HashSet<Ticker>,
    failing_writes: bool,
}

/// Process-local store with failure switches for exercising error paths
#[derive(Default)]
pub struct InMemoryReportStore {
    state: Mutex<MemoryState>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_companies<I, T>(tickers: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Ticker>,
    {
        let store = Self::new();
        for ticker in tickers {
            store.add_company(ticker.into());
        }
        store
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    pub fn add_company(&self, ticker: Ticker) {
        if let Ok(mut state) = self.lock() {
            state.companies.insert(ticker);
        }
    }

    /// Seed a ledger slot directly
    pub fn set_ledger_entry(&self, ticker: &Ticker, kind: ReportKind, period: FiscalPeriod, tag: VersionTag) {
        if let Ok(mut state) = self.lock() {
            state
                .ledgers
                .entry((ticker.clone(), kind))
                .or_default()
                .insert(period, tag);
        }
    }

    pub fn ledger(&self, ticker: &Ticker, kind: ReportKind) -> VersionLedger {
        self.lock()
            .ok()
            .and_then(|state| state.ledgers.get(&(ticker.clone(), kind)).cloned())
            .unwrap_or_default()
    }

    pub fn reports(&self) -> Vec<ReportRecord> {
        self.lock()
            .map(|state| state.reports.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Make ledger reads for `ticker` fail
    pub fn fail_ledger_reads_for(&self, ticker: &Ticker) {
        if let Ok(mut state) = self.lock() {
            state.unreadable_ledgers.insert(ticker.clone());
        }
    }

    /// Make every report and ledger write fail
    pub fn fail_writes(&self, failing: bool) {
        if let Ok(mut state) = self.lock() {
            state.failing_writes = failing;
        }
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn list_companies(&self) -> Result<Vec<Ticker>> {
        Ok(self.lock()?.companies.iter().cloned().collect())
    }

    async fn get_version_table(&self, ticker: &Ticker, kind: ReportKind) -> Result<VersionLedger> {
        let state = self.lock()?;
        if state.unreadable_ledgers.contains(ticker) {
            return Err(anyhow!("ledger for {} is unavailable", ticker));
        }
        Ok(state
            .ledgers
            .get(&(ticker.clone(), kind))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_report(&self, record: &ReportRecord) -> Result<CreateOutcome> {
        let mut state = self.lock()?;
        if state.failing_writes {
            return Err(anyhow!("report write rejected"));
        }
        let key = (
            (record.ticker.clone(), record.report_kind, record.fiscal_period),
            record.version.clone(),
        );
        if state.reports.contains_key(&key) {
            return Ok(CreateOutcome::Conflict);
        }
        state.reports.insert(key, record.clone());
        Ok(CreateOutcome::Created)
    }

    async fn upsert_version(
        &self,
        ticker: &Ticker,
        kind: ReportKind,
        period: FiscalPeriod,
        tag: VersionTag,
    ) -> Result<()> {
        let mut state = self.lock()?;
        if state.failing_writes {
            return Err(anyhow!("ledger write rejected"));
        }
        state
            .ledgers
            .entry((ticker.clone(), kind))
            .or_default()
            .insert(period, tag);
        Ok(())
    }
}
