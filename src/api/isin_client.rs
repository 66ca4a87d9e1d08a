use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{debug, info};

use super::mops_client::BROWSER_USER_AGENT;
use crate::models::{Company, Ticker};

const SYMBOL_HEADER: &str = "有價證券代號";
const NAME_HEADER: &str = "有價證券名稱";

/// Client for the exchange's ISIN listing page, the source of the company universe
pub struct IsinClient {
    client: Client,
    listing_url: String,
}

impl IsinClient {
    pub fn new(listing_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .context("failed to build ISIN HTTP client")?;

        Ok(Self {
            client,
            listing_url: listing_url.into(),
        })
    }

    /// Fetch every listed company on the configured listing page
    pub async fn fetch_listed_companies(&self) -> Result<Vec<Company>> {
        info!("📋 Fetching company listing from {}", self.listing_url);

        let response = self
            .client
            .get(&self.listing_url)
            .send()
            .await
            .context("failed to request company listing")?;

        if !response.status().is_success() {
            return Err(anyhow!("company listing returned HTTP {}", response.status()));
        }

        // the page is served in Big5 and does not always declare it
        let body = response
            .text_with_charset("big5")
            .await
            .context("failed to read company listing body")?;

        let companies = parse_listing(&body)?;
        info!("✅ Found {} listed companies", companies.len());
        Ok(companies)
    }
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

/// Extract (symbol, name) pairs from the listing table
pub fn parse_listing(html: &str) -> Result<Vec<Company>> {
    let document = Html::parse_document(html);
    let row_selector = Selector::parse("tr").map_err(|e| anyhow!("bad selector: {}", e))?;
    let cell_selector = Selector::parse("td, th").map_err(|e| anyhow!("bad selector: {}", e))?;

    let mut columns: Option<(usize, usize)> = None;
    let mut companies = Vec::new();

    for row in document.select(&row_selector) {
        let cells: Vec<String> = row.select(&cell_selector).map(cell_text).collect();

        let Some((symbol_idx, name_idx)) = columns else {
            let symbol_idx = cells.iter().position(|c| c == SYMBOL_HEADER);
            let name_idx = cells.iter().position(|c| c == NAME_HEADER);
            if let (Some(s), Some(n)) = (symbol_idx, name_idx) {
                columns = Some((s, n));
            }
            continue;
        };

        let (Some(symbol), Some(name)) = (cells.get(symbol_idx), cells.get(name_idx)) else {
            debug!("skipping short listing row: {:?}", cells);
            continue;
        };
        if symbol.is_empty() {
            continue;
        }

        companies.push(Company {
            ticker: Ticker::new(symbol.as_str()),
            name: name.clone(),
        });
    }

    if columns.is_none() {
        return Err(anyhow!(
            "listing page has no {} / {} header row",
            SYMBOL_HEADER,
            NAME_HEADER
        ));
    }

    Ok(companies)
}
