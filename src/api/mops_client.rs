use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ApiRateLimiter, DisclosureSource, FetchOutcome};
use crate::config::Config;
use crate::models::{FiscalPeriod, ReportKind, Ticker};

/// The portal rejects requests without a desktop browser user agent
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0";

/// Body phrase meaning the company filed nothing for the requested period
pub const NOT_FILED_MARKER: &str = "查無所需資料";

/// Body phrase the portal returns (with HTTP 200) when throttling an address
pub const THROTTLED_MARKER: &str = "Too many query requests from your ip";

/// MOPS financial statement client
pub struct MopsClient {
    client: Client,
    endpoints: HashMap<ReportKind, String>,
    rate_limiter: Arc<ApiRateLimiter>,
}

impl MopsClient {
    pub fn new(config: &Config, rate_limiter: Arc<ApiRateLimiter>) -> Result<Self> {
        let endpoints = ReportKind::ALL
            .iter()
            .map(|kind| (*kind, config.endpoint_for(*kind)))
            .collect();
        Self::with_endpoints(endpoints, config.request_timeout, rate_limiter)
    }

    pub fn with_endpoints(
        endpoints: HashMap<ReportKind, String>,
        timeout: Duration,
        rate_limiter: Arc<ApiRateLimiter>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .context("failed to build MOPS HTTP client")?;

        Ok(Self {
            client,
            endpoints,
            rate_limiter,
        })
    }

    fn form_fields(ticker: &Ticker, period: FiscalPeriod) -> Vec<(&'static str, String)> {
        vec![
            ("encodeURIComponent", "1".to_string()),
            ("step", "1".to_string()),
            ("firstin", "1".to_string()),
            ("off", "1".to_string()),
            ("co_id", ticker.as_str().to_string()),
            ("year", period.year().to_string()),
            ("season", period.quarter().to_string()),
        ]
    }

    /// Classify a 2xx body. Marker phrases win over anything else in the page.
    fn classify_body(body: String) -> FetchOutcome {
        if body.contains(NOT_FILED_MARKER) {
            FetchOutcome::NotFiled
        } else if body.contains(THROTTLED_MARKER) {
            FetchOutcome::RateLimited
        } else {
            FetchOutcome::Success(body.into_bytes())
        }
    }
}

#[async_trait]
impl DisclosureSource for MopsClient {
    async fn fetch(&self, ticker: &Ticker, period: FiscalPeriod, kind: ReportKind) -> FetchOutcome {
        let Some(url) = self.endpoints.get(&kind) else {
            return FetchOutcome::TransportError(format!("no endpoint configured for {}", kind));
        };

        self.rate_limiter.acquire().await;

        debug!(%ticker, %period, %kind, "POST {}", url);
        let response = match self
            .client
            .post(url)
            .form(&Self::form_fields(ticker, period))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(%ticker, %period, %kind, "request failed: {}", e);
                return FetchOutcome::TransportError(e.to_string());
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(%ticker, %period, %kind, "portal answered HTTP {}", status);
            return FetchOutcome::UpstreamError(status.as_u16());
        }

        // text() decodes with the charset the portal declares
        match response.text().await {
            Ok(body) => Self::classify_body(body),
            Err(e) => FetchOutcome::TransportError(format!("failed to read body: {}", e)),
        }
    }
}
