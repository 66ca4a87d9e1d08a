use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::api::{DisclosureSource, FetchOutcome};
use crate::concurrent_fetcher::JobHandler;
use crate::config::{Config, DEFAULT_SUPPORTED_VERSION};
use crate::database::{CreateOutcome, ReportStore};
use crate::extractors;
use crate::models::{FetchJob, ReportKind, ReportRecord, VersionTag};

/// How a single fetch job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Report stored and ledger advanced to the supported version
    Stored,
    /// Report already existed under the supported version; ledger advanced
    AlreadyStored,
    /// Portal confirmed nothing was filed; ledger set to NDF
    NotFiled,
    /// Upstream trouble after all attempts; ledger untouched
    Transient(String),
    /// Page layout did not match the extraction schema; ledger untouched
    ParseFailed(String),
    /// Report or ledger write failed; retried by a later sweep
    StoreFailed(String),
}

/// Runs one job: fetch, extract, store, then update the ledger
pub struct ReportCollector {
    source: Arc<dyn DisclosureSource>,
    store: Arc<dyn ReportStore>,
    supported_versions: HashMap<ReportKind, String>,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl ReportCollector {
    pub fn new(source: Arc<dyn DisclosureSource>, store: Arc<dyn ReportStore>, config: &Config) -> Self {
        let supported_versions = ReportKind::ALL
            .iter()
            .map(|kind| (*kind, config.supported_version(*kind).to_string()))
            .collect();

        Self {
            source,
            store,
            supported_versions,
            retry_attempts: config.retry_attempts,
            retry_delay: config.retry_delay,
        }
    }

    /// Override the retry policy
    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    fn supported_version(&self, kind: ReportKind) -> &str {
        self.supported_versions
            .get(&kind)
            .map(String::as_str)
            .unwrap_or(DEFAULT_SUPPORTED_VERSION)
    }

    /// Fetch, retrying transient outcomes. Every attempt goes through the rate limiter.
    async fn fetch_with_retry(&self, job: &FetchJob) -> FetchOutcome {
        let mut attempt = 1;
        loop {
            let outcome = self
                .source
                .fetch(&job.ticker, job.fiscal_period, job.report_kind)
                .await;

            if !outcome.is_transient() || attempt >= self.retry_attempts {
                return outcome;
            }

            debug!(
                "🔄 {} attempt {}/{} failed ({}), retrying",
                job,
                attempt,
                self.retry_attempts,
                outcome.describe()
            );
            attempt += 1;
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    pub async fn collect(&self, job: &FetchJob) -> JobOutcome {
        let ticker = &job.ticker;
        let period = job.fiscal_period;
        let kind = job.report_kind;

        let body = match self.fetch_with_retry(job).await {
            FetchOutcome::Success(body) => body,
            FetchOutcome::NotFiled => {
                return match self.store.upsert_version(ticker, kind, period, VersionTag::NotFiled).await {
                    Ok(()) => {
                        info!(%ticker, %period, %kind, "📭 Not filed, marked NDF");
                        JobOutcome::NotFiled
                    }
                    Err(e) => {
                        error!(%ticker, %period, %kind, "❌ Failed to record NDF: {:#}", e);
                        JobOutcome::StoreFailed(e.to_string())
                    }
                };
            }
            transient => {
                warn!(%ticker, %period, %kind, "⚠️ Fetch failed: {}", transient.describe());
                return JobOutcome::Transient(transient.describe());
            }
        };

        let fields = match extractors::extract(&body, period, kind) {
            Ok(fields) => fields,
            Err(e) => {
                error!(%ticker, %period, %kind, "❌ Extraction failed, page layout may have changed: {}", e);
                return JobOutcome::ParseFailed(e.to_string());
            }
        };

        let version = self.supported_version(kind).to_string();
        let record = ReportRecord {
            ticker: ticker.clone(),
            fiscal_period: period,
            report_kind: kind,
            version: version.clone(),
            fields,
        };

        let created = match self.store.create_report(&record).await {
            Ok(created) => created,
            Err(e) => {
                error!(%ticker, %period, %kind, "❌ Failed to store report: {:#}", e);
                return JobOutcome::StoreFailed(e.to_string());
            }
        };

        // the ledger only moves once the report is durably stored
        if let Err(e) = self
            .store
            .upsert_version(ticker, kind, period, VersionTag::Version(version))
            .await
        {
            error!(%ticker, %period, %kind, "❌ Report stored but ledger update failed: {:#}", e);
            return JobOutcome::StoreFailed(e.to_string());
        }

        match created {
            CreateOutcome::Created => {
                info!(%ticker, %period, %kind, "✅ Stored {} fields", record.fields.len());
                JobOutcome::Stored
            }
            CreateOutcome::Conflict => {
                debug!(%ticker, %period, %kind, "report already stored");
                JobOutcome::AlreadyStored
            }
        }
    }
}

#[async_trait]
impl JobHandler for ReportCollector {
    async fn handle(&self, job: &FetchJob) -> JobOutcome {
        self.collect(job).await
    }
}
