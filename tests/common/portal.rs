//! A fake MOPS portal on a local wiremock server

use report_sync::config::Config;
use report_sync::models::FiscalPeriod;
use std::collections::HashMap;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::test_data::{balance_sheet_page, not_filed_page};

pub struct FakePortal {
    pub server: MockServer,
}

impl FakePortal {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}/mops/web", self.server.uri())
    }

    /// Engine configuration pointed at this portal. Retries are off and the
    /// rate limit is generous unless `overrides` says otherwise.
    pub fn config(&self, overrides: &[(&str, &str)]) -> Config {
        let mut vars: HashMap<String, String> = HashMap::from([
            ("MOPS_BASE_URL".to_string(), self.base_url()),
            ("REQUESTS_PER_SECOND".to_string(), "1000".to_string()),
            ("RETRY_ATTEMPTS".to_string(), "1".to_string()),
            ("WORKER_COUNT".to_string(), "3".to_string()),
        ]);
        for (name, value) in overrides {
            vars.insert(name.to_string(), value.to_string());
        }
        Config::from_lookup(|name| vars.get(name).cloned()).expect("test configuration is valid")
    }

    /// Answer balance sheet requests for (ticker, period), expecting exactly `calls` of them
    pub async fn respond(&self, ticker: &str, period: FiscalPeriod, response: ResponseTemplate, calls: u64) {
        Mock::given(method("POST"))
            .and(path("/mops/web/ajax_t164sb03"))
            .and(body_string_contains(
                format!("co_id={}&year={}&season={}", ticker, period.year(), period.quarter()).as_str(),
            ))
            .respond_with(response)
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    pub async fn filed(&self, ticker: &str, period: FiscalPeriod, calls: u64) {
        let page = balance_sheet_page(period);
        self.respond(ticker, period, ResponseTemplate::new(200).set_body_string(page), calls)
            .await;
    }

    pub async fn not_filed(&self, ticker: &str, period: FiscalPeriod, calls: u64) {
        self.respond(
            ticker,
            period,
            ResponseTemplate::new(200).set_body_string(not_filed_page()),
            calls,
        )
        .await;
    }

    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }
}
