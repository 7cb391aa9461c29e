//! Reference marketplace (Steam community market) sell prices.
//!
//! Walks the search/render endpoint 100 items at a time. Steam is the
//! flakiest endpoint in the fleet — pages intermittently return nothing —
//! so the sweep only stops after several consecutive empty pages, and the
//! per-source config usually carries a high retry count and proxy use.
//! Prices arrive as integer cents.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::SourceAdapter;
use crate::config::SourceConfig;
use crate::net::fetcher::{FetchPolicy, RetryingFetcher};
use crate::types::PriceRecord;

const SOURCE_NAME: &str = "steam";

const DEFAULT_ENDPOINT: &str = "https://steamcommunity.com/market/search/render/";

const PAGE_SIZE: u32 = 100;

/// Stop after this many consecutive empty pages.
const EMPTY_PAGES_THRESHOLD: u32 = 5;

/// Absolute ceiling on fetched pages.
const MAX_PAGES: u32 = 400;

/// Wall-clock budget for one full sweep.
const MAX_SWEEP_DURATION: Duration = Duration::from_secs(30 * 60);

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RenderResponse {
    #[serde(default)]
    results: Vec<RenderResult>,
}

#[derive(Debug, Deserialize)]
struct RenderResult {
    #[serde(default)]
    name: String,
    /// Lowest sell order in integer cents.
    #[serde(default)]
    sell_price: u64,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct SteamListingSource {
    endpoint: String,
    policy: FetchPolicy,
}

impl SteamListingSource {
    pub fn new(cfg: &SourceConfig) -> Self {
        let endpoint = if cfg.endpoint.is_empty() {
            DEFAULT_ENDPOINT.to_string()
        } else {
            cfg.endpoint.clone()
        };
        Self {
            endpoint,
            policy: FetchPolicy::from_source(cfg),
        }
    }

    fn page_url(&self, start: u32) -> String {
        format!(
            "{}?query=&start={start}&count={PAGE_SIZE}&search_descriptions=0&sort_column=popular&sort_dir=desc&appid=730&norender=1",
            self.endpoint
        )
    }

    fn parse_page(payload: RenderResponse) -> Vec<PriceRecord> {
        let mut records = Vec::with_capacity(payload.results.len());
        for result in payload.results {
            if result.name.is_empty() {
                continue;
            }
            // Slashes break the flat listing-file layout downstream.
            let name = result.name.replace('/', "-");
            records.push(PriceRecord::new(name, result.sell_price as f64 / 100.0));
        }
        records
    }
}

#[async_trait]
impl SourceAdapter for SteamListingSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch_data(&self, http: &RetryingFetcher) -> Result<Vec<PriceRecord>> {
        let started = Instant::now();
        let mut all_records = Vec::new();
        let mut empty_pages = 0u32;
        let mut page = 0u32;

        while empty_pages < EMPTY_PAGES_THRESHOLD && page < MAX_PAGES {
            if started.elapsed() > MAX_SWEEP_DURATION {
                warn!(page, "Steam sweep exceeded time budget, stopping");
                break;
            }

            let url = self.page_url(page * PAGE_SIZE);
            let records = match http.fetch(SOURCE_NAME, Method::GET, &url, &self.policy).await {
                Some(resp) => match resp.json::<RenderResponse>().await {
                    Ok(payload) => Self::parse_page(payload),
                    Err(e) => {
                        warn!(page, error = %e, "Failed to parse Steam render page");
                        Vec::new()
                    }
                },
                None => Vec::new(),
            };

            if records.is_empty() {
                empty_pages += 1;
            } else {
                empty_pages = 0;
                debug!(page, count = records.len(), "Steam page parsed");
                all_records.extend(records);
            }
            page += 1;
        }

        info!(count = all_records.len(), "Steam sell prices parsed");
        Ok(all_records)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
