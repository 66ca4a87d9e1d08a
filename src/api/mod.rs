use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::models::{FiscalPeriod, ReportKind, Ticker};

pub mod isin_client;
pub mod mops_client;
pub use isin_client::IsinClient;
pub use mops_client::MopsClient;

/// Process-wide request gate shared by every caller of the disclosure portal.
///
/// Grants are spaced at least `1 / rate` apart. The governor cell's arrival
/// time is the single "last grant" state; the turnstile serializes waiters so
/// they are granted in arrival order.
pub struct ApiRateLimiter {
    limiter: DefaultDirectRateLimiter,
    turnstile: Mutex<()>,
    interval: Duration,
}

impl ApiRateLimiter {
    /// Returns `None` when `requests_per_second` is not a positive, finite number
    pub fn per_second(requests_per_second: f64) -> Option<Self> {
        if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
            return None;
        }
        Self::with_interval(Duration::from_secs_f64(1.0 / requests_per_second))
    }

    pub fn with_interval(interval: Duration) -> Option<Self> {
        // burst of one: no grant may follow the previous one sooner than `interval`
        let quota = Quota::with_period(interval)?;
        Some(Self {
            limiter: RateLimiter::direct(quota),
            turnstile: Mutex::new(()),
            interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next request slot. Never fails.
    pub async fn acquire(&self) {
        let _turn = self.turnstile.lock().await;
        self.limiter.until_ready().await;
    }
}

/// Result of a single disclosure request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Body of a page that carries statement data, as UTF-8 bytes
    Success(Vec<u8>),
    /// The portal reports nothing was filed for the period
    NotFiled,
    /// The portal is throttling this client
    RateLimited,
    /// Non-2xx HTTP status
    UpstreamError(u16),
    /// Connection, timeout or body read failure
    TransportError(String),
}

impl FetchOutcome {
    /// Outcomes worth retrying later; they never touch the ledger
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchOutcome::RateLimited | FetchOutcome::UpstreamError(_) | FetchOutcome::TransportError(_)
        )
    }

    pub fn describe(&self) -> String {
        match self {
            FetchOutcome::Success(body) => format!("success ({} bytes)", body.len()),
            FetchOutcome::NotFiled => "not filed".to_string(),
            FetchOutcome::RateLimited => "rate limited by portal".to_string(),
            FetchOutcome::UpstreamError(status) => format!("upstream HTTP {}", status),
            FetchOutcome::TransportError(reason) => format!("transport error: {}", reason),
        }
    }
}

/// Source of raw statement pages
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DisclosureSource: Send + Sync {
    async fn fetch(&self, ticker: &Ticker, period: FiscalPeriod, kind: ReportKind) -> FetchOutcome;
}
