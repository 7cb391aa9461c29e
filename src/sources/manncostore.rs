//! Mannco.store integration — the browser-driven variant.
//!
//! The endpoint sits behind an anti-bot wall a bare HTTP client cannot
//! pass, so fetching goes through a `BrowserSession` (driver lifecycle
//! owned by the integration, not the core). The fetch step is slow and
//! stateful but runs under the same rate-limit/retry/backoff contract as
//! every other source, so the scheduler treats it uniformly.
//!
//! The API pages with a `skip` offset of 50 and returns a bare JSON
//! array; an empty array ends the sweep. Prices are integer cents.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::SourceAdapter;
use crate::config::SourceConfig;
use crate::net::fetcher::{BrowserSession, FetchPolicy, RetryingFetcher};
use crate::types::PriceRecord;

const SOURCE_NAME: &str = "manncostore";

const DEFAULT_ENDPOINT: &str =
    "https://mannco.store/items/get?price=DESC&page=1&i=0&game=730";

const ITEM_URL_PREFIX: &str = "https://mannco.store/item/";

const PAGE_STEP: u32 = 50;

/// Absolute ceiling on paged requests per sweep.
const MAX_PAGES: u32 = 400;

/// Wall-clock budget for one full sweep; browser page loads are slow.
const MAX_SWEEP_DURATION: Duration = Duration::from_secs(20 * 60);

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ManncoItem {
    #[serde(default)]
    name: String,
    /// Price in integer cents.
    #[serde(default)]
    price: u64,
    #[serde(default)]
    url: Option<String>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct ManncoStoreSource {
    endpoint: String,
    policy: FetchPolicy,
    session: Arc<dyn BrowserSession>,
}

impl ManncoStoreSource {
    pub fn new(cfg: &SourceConfig, session: Arc<dyn BrowserSession>) -> Self {
        let endpoint = if cfg.endpoint.is_empty() {
            DEFAULT_ENDPOINT.to_string()
        } else {
            cfg.endpoint.clone()
        };
        Self {
            endpoint,
            policy: FetchPolicy::from_source(cfg),
            session,
        }
    }

    /// Cents to dollars ("1234" → 12.34).
    fn cents_to_dollars(cents: u64) -> f64 {
        cents as f64 / 100.0
    }

    fn parse_page(body: &str) -> Vec<PriceRecord> {
        let items: Vec<ManncoItem> = match serde_json::from_str(body) {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Failed to parse Mannco page");
                return Vec::new();
            }
        };

        let mut records = Vec::with_capacity(items.len());
        for item in items {
            if item.name.is_empty() {
                continue;
            }
            let mut record = PriceRecord::new(item.name, Self::cents_to_dollars(item.price));
            if let Some(path) = item.url {
                record = record.with_url(format!("{ITEM_URL_PREFIX}{path}"));
            }
            records.push(record);
        }
        records
    }
}

#[async_trait]
impl SourceAdapter for ManncoStoreSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch_data(&self, http: &RetryingFetcher) -> Result<Vec<PriceRecord>> {
        let started = Instant::now();
        let mut all_records = Vec::new();
        let mut skip = 0u32;

        for _ in 0..MAX_PAGES {
            if started.elapsed() > MAX_SWEEP_DURATION {
                warn!(skip, "Mannco sweep exceeded time budget, stopping");
                break;
            }

            let url = format!("{}&skip={skip}", self.endpoint);
            let body = match http
                .fetch_browser(SOURCE_NAME, self.session.as_ref(), &url, &self.policy)
                .await
            {
                Some(body) => body,
                None => break,
            };

            let records = Self::parse_page(&body);
            if records.is_empty() {
                debug!(skip, "Empty Mannco page, sweep complete");
                break;
            }

            debug!(skip, count = records.len(), "Mannco page parsed");
            all_records.extend(records);
            skip += PAGE_STEP;
        }

        info!(count = all_records.len(), "Mannco items parsed");
        Ok(all_records)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
