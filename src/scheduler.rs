use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::api::{ApiRateLimiter, MopsClient};
use crate::concurrent_fetcher::{SweepStats, WorkerPool};
use crate::config::Config;
use crate::data_collector::ReportCollector;
use crate::database::ReportStore;
use crate::models::{FetchJob, Ticker};
use crate::version_reconciler::VersionReconciler;

/// Fires once a day at a fixed local wall-clock time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyTrigger {
    at: NaiveTime,
}

impl DailyTrigger {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(|at| Self { at })
    }

    /// First firing strictly after `now`
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let mut date = now.date_naive();
        // a DST gap can swallow the wall-clock time on one day
        for _ in 0..3 {
            if let Some(candidate) = now
                .timezone()
                .from_local_datetime(&date.and_time(self.at))
                .earliest()
            {
                if candidate > *now {
                    return Some(candidate);
                }
            }
            date = date.succ_opt()?;
        }
        None
    }
}

/// What one sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub planned: usize,
    pub ledgers_failed: usize,
    pub stats: SweepStats,
    /// Shutdown arrived before the queue drained
    pub interrupted: bool,
}

/// Resolves once shutdown has been signalled. Never resolves if the sender is gone.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Runs reconciliation sweeps: one at startup, then daily. Sweeps never overlap.
pub struct Scheduler {
    reconciler: VersionReconciler,
    pool: WorkerPool,
    trigger: DailyTrigger,
}

impl Scheduler {
    pub fn new(reconciler: VersionReconciler, pool: WorkerPool, trigger: DailyTrigger) -> Self {
        Self {
            reconciler,
            pool,
            trigger,
        }
    }

    /// Wire the whole engine from configuration: one shared rate limiter and
    /// MOPS client, the worker pool, and the reconciler over `store`.
    /// Must be called inside a tokio runtime.
    pub fn from_config(config: &Config, store: Arc<dyn ReportStore>) -> Result<Self> {
        let rate_limiter = ApiRateLimiter::per_second(config.requests_per_second)
            .ok_or_else(|| anyhow!("invalid request rate {}", config.requests_per_second))?;
        let client = MopsClient::new(config, Arc::new(rate_limiter))?;

        let collector = ReportCollector::new(Arc::new(client), Arc::clone(&store), config);
        let pool = WorkerPool::start(Arc::new(collector), config.worker_count);

        let kinds = config
            .report_kinds
            .iter()
            .map(|kind| (*kind, config.supported_version(*kind).to_string()))
            .collect();
        let reconciler = VersionReconciler::new(store, config.calendar(), kinds);

        let trigger = DailyTrigger::new(config.sweep_hour, config.sweep_minute)
            .ok_or_else(|| anyhow!("invalid sweep time {}:{}", config.sweep_hour, config.sweep_minute))?;

        Ok(Self::new(reconciler, pool, trigger))
    }

    /// Plan and execute one reconciliation sweep as of `today`
    pub async fn run_sweep(&self, today: NaiveDate, shutdown: &mut watch::Receiver<bool>) -> Result<SweepReport> {
        info!("🔍 Starting reconciliation sweep for {}", today);
        let plan = self.reconciler.plan_sweep(today).await?;
        let mut report = self.execute(plan.jobs, shutdown).await;
        report.ledgers_failed = plan.ledgers_failed;
        Ok(report)
    }

    /// Enumerate and fetch every missing period down to the floor, ignoring NDF marks
    pub async fn run_backfill(
        &self,
        today: NaiveDate,
        tickers: Option<Vec<Ticker>>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SweepReport> {
        info!("📚 Starting historical backfill for {}", today);
        let plan = self.reconciler.plan_backfill(today, tickers).await?;
        let mut report = self.execute(plan.jobs, shutdown).await;
        report.ledgers_failed = plan.ledgers_failed;
        Ok(report)
    }

    /// Queue `jobs`, wait for them to finish, and collect statistics
    pub async fn execute(&self, jobs: Vec<FetchJob>, shutdown: &mut watch::Receiver<bool>) -> SweepReport {
        // counters left from a previous, interrupted run are not ours
        self.pool.take_stats();

        let planned = jobs.len();
        let accepted = self.pool.enqueue_all(jobs);
        if accepted < planned {
            warn!("⚠️ Only {} of {} jobs were queued", accepted, planned);
        }

        let interrupted = tokio::select! {
            _ = self.pool.drain() => false,
            _ = shutdown_requested(shutdown) => true,
        };

        if interrupted {
            warn!("🛑 Shutdown requested, waiting for in-flight jobs");
            self.pool.cancel();
            self.pool.drain().await;
        }

        let stats = self.pool.take_stats();
        info!(
            "✅ Sweep finished: {} stored, {} already stored, {} not filed, {} failed, {} cancelled",
            stats.stored,
            stats.already_stored,
            stats.not_filed,
            stats.failures(),
            stats.cancelled
        );

        SweepReport {
            planned,
            ledgers_failed: 0,
            stats,
            interrupted,
        }
    }

    /// Sweep now, then every day at the trigger time, until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("🚀 Scheduler started, daily sweep at {}", self.trigger.at.format("%H:%M"));

        let result = loop {
            match self.run_sweep(Local::now().date_naive(), &mut shutdown).await {
                Ok(report) if report.interrupted => break Ok(()),
                Ok(_) => {}
                Err(e) => error!("❌ Sweep failed: {:#}", e),
            }

            let now = Local::now();
            let Some(next) = self.trigger.next_after(&now) else {
                break Err(anyhow!("no upcoming trigger time after {}", now));
            };
            let wait = (next - now).to_std().unwrap_or_default();
            info!("⏰ Next sweep at {}", next.format("%Y-%m-%d %H:%M"));

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown_requested(&mut shutdown) => break Ok(()),
            }
        };

        info!("👋 Scheduler stopping");
        self.pool.shutdown().await;
        result
    }

    /// Stop the worker pool after one-shot runs
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}
