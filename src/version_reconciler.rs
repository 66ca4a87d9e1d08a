//! Version reconciliation
//!
//! Decides which (ticker, kind, period) slots need fetching by walking each
//! ledger backwards from the most recently closed quarter. The walk stops at
//! the first period the portal confirmed as not filed (NDF) or at the oldest
//! supported period, so companies listed recently are never probed for years
//! before their first filing.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::ReportStore;
use crate::fiscal_calendar::FiscalCalendar;
use crate::models::{FetchJob, FiscalPeriod, ReportKind, Ticker, VersionLedger};

/// Why a ledger scan ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Next period would be older than the earliest supported period
    Floor,
    /// The ledger marks this period as never filed
    NotFiled(FiscalPeriod),
    /// Calendar arithmetic ran below fiscal year 1
    OutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Looking at the most recently closed period; fetched unless current
    Start(FiscalPeriod),
    Scanning(FiscalPeriod),
    Stopped(StopReason),
}

/// Backward walk over one ledger, yielding the periods that need a fetch
#[derive(Debug, Clone)]
pub struct LedgerScan<'a> {
    ledger: &'a VersionLedger,
    supported_version: &'a str,
    floor: FiscalPeriod,
    state: ScanState,
}

impl<'a> LedgerScan<'a> {
    /// Scan starting one quarter before `current`
    pub fn new(
        ledger: &'a VersionLedger,
        supported_version: &'a str,
        current: FiscalPeriod,
        floor: FiscalPeriod,
    ) -> Self {
        let state = match current.previous() {
            Ok(first) => ScanState::Start(first),
            Err(_) => ScanState::Stopped(StopReason::OutOfRange),
        };
        Self {
            ledger,
            supported_version,
            floor,
            state,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Stop reason once the scan has ended
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self.state {
            ScanState::Stopped(reason) => Some(reason),
            _ => None,
        }
    }

    fn is_current(&self, period: FiscalPeriod) -> bool {
        self.ledger
            .get(&period)
            .map_or(false, |tag| tag.is_version(self.supported_version))
    }

    fn step_back(from: FiscalPeriod) -> ScanState {
        match from.previous() {
            Ok(previous) => ScanState::Scanning(previous),
            Err(_) => ScanState::Stopped(StopReason::OutOfRange),
        }
    }
}

impl Iterator for LedgerScan<'_> {
    type Item = FiscalPeriod;

    fn next(&mut self) -> Option<FiscalPeriod> {
        loop {
            match self.state {
                ScanState::Stopped(_) => return None,
                ScanState::Start(period) | ScanState::Scanning(period) if period < self.floor => {
                    self.state = ScanState::Stopped(StopReason::Floor);
                }
                // the latest closed quarter is retried even over an NDF mark,
                // since companies may still file it late
                ScanState::Start(period) => {
                    self.state = Self::step_back(period);
                    if !self.is_current(period) {
                        return Some(period);
                    }
                }
                ScanState::Scanning(period) => match self.ledger.get(&period) {
                    Some(tag) if tag.is_not_filed() => {
                        self.state = ScanState::Stopped(StopReason::NotFiled(period));
                    }
                    Some(tag) if tag.is_version(self.supported_version) => {
                        self.state = Self::step_back(period);
                    }
                    _ => {
                        self.state = Self::step_back(period);
                        return Some(period);
                    }
                },
            }
        }
    }
}

/// Every period from the one before `current` down to `floor` that is not
/// already stored under `supported_version`. NDF marks are ignored.
pub fn backfill_periods(
    ledger: &VersionLedger,
    supported_version: &str,
    current: FiscalPeriod,
    floor: FiscalPeriod,
) -> Vec<FiscalPeriod> {
    let mut periods = Vec::new();
    let mut next = current.previous();
    while let Ok(period) = next {
        if period < floor {
            break;
        }
        if !ledger
            .get(&period)
            .map_or(false, |tag| tag.is_version(supported_version))
        {
            periods.push(period);
        }
        next = period.previous();
    }
    periods
}

/// Jobs planned by one sweep
#[derive(Debug, Default)]
pub struct SweepPlan {
    pub jobs: Vec<FetchJob>,
    pub ledgers_scanned: usize,
    /// (ticker, kind) pairs skipped because their ledger could not be read
    pub ledgers_failed: usize,
}

/// Produces fetch jobs by reconciling stored ledgers against the calendar
pub struct VersionReconciler {
    store: Arc<dyn ReportStore>,
    calendar: FiscalCalendar,
    kinds: Vec<(ReportKind, String)>,
}

impl VersionReconciler {
    /// `kinds` pairs each synced report kind with its supported version
    pub fn new(store: Arc<dyn ReportStore>, calendar: FiscalCalendar, kinds: Vec<(ReportKind, String)>) -> Self {
        Self { store, calendar, kinds }
    }

    /// Jobs for one (ticker, kind) ledger
    pub fn plan_ledger(
        &self,
        ticker: &Ticker,
        kind: ReportKind,
        supported_version: &str,
        ledger: &VersionLedger,
        current: FiscalPeriod,
    ) -> Vec<FetchJob> {
        let mut scan = LedgerScan::new(
            ledger,
            supported_version,
            current,
            self.calendar.earliest_supported_period(),
        );
        let jobs: Vec<FetchJob> = scan
            .by_ref()
            .map(|period| FetchJob::new(ticker.clone(), period, kind))
            .collect();

        debug!(
            %ticker, %kind,
            "planned {} jobs, scan stopped: {:?}",
            jobs.len(),
            scan.stop_reason()
        );
        jobs
    }

    /// Reconcile every company's ledgers as of `today`.
    ///
    /// Failing to list companies aborts the sweep; failing to read one
    /// ledger only skips that (ticker, kind).
    pub async fn plan_sweep(&self, today: NaiveDate) -> Result<SweepPlan> {
        let current = self.calendar.current_period(today)?;
        let tickers = self
            .store
            .list_companies()
            .await
            .context("failed to list companies")?;

        info!("📊 Reconciling {} companies as of {}", tickers.len(), current);

        let mut plan = SweepPlan::default();
        for ticker in &tickers {
            for (kind, version) in &self.kinds {
                let ledger = match self.store.get_version_table(ticker, *kind).await {
                    Ok(ledger) => ledger,
                    Err(e) => {
                        warn!(%ticker, %kind, "⚠️ Skipping, ledger unavailable: {:#}", e);
                        plan.ledgers_failed += 1;
                        continue;
                    }
                };
                plan.ledgers_scanned += 1;
                plan.jobs
                    .extend(self.plan_ledger(ticker, *kind, version, &ledger, current));
            }
        }

        info!(
            "📋 Planned {} jobs from {} ledgers ({} unreadable)",
            plan.jobs.len(),
            plan.ledgers_scanned,
            plan.ledgers_failed
        );
        Ok(plan)
    }

    /// Full historical enumeration for `tickers` (or every company), ignoring NDF marks
    pub async fn plan_backfill(&self, today: NaiveDate, tickers: Option<Vec<Ticker>>) -> Result<SweepPlan> {
        let current = self.calendar.current_period(today)?;
        let tickers = match tickers {
            Some(tickers) => tickers,
            None => self
                .store
                .list_companies()
                .await
                .context("failed to list companies")?,
        };

        let floor = self.calendar.earliest_supported_period();
        let mut plan = SweepPlan::default();
        for ticker in &tickers {
            for (kind, version) in &self.kinds {
                let ledger = match self.store.get_version_table(ticker, *kind).await {
                    Ok(ledger) => ledger,
                    Err(e) => {
                        warn!(%ticker, %kind, "⚠️ Skipping backfill, ledger unavailable: {:#}", e);
                        plan.ledgers_failed += 1;
                        continue;
                    }
                };
                plan.ledgers_scanned += 1;
                plan.jobs.extend(
                    backfill_periods(&ledger, version, current, floor)
                        .into_iter()
                        .map(|period| FetchJob::new(ticker.clone(), period, *kind)),
                );
            }
        }

        info!("📋 Backfill planned {} jobs for {} companies", plan.jobs.len(), tickers.len());
        Ok(plan)
    }
}
