//! Skinout integration.
//!
//! Paginated market endpoint: pages are fetched in order until several
//! consecutive empty pages are seen. Both a hard page cap and a wall-
//! clock budget bound the sweep, so a misbehaving endpoint can never pin
//! a fetch cycle forever.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::SourceAdapter;
use crate::config::SourceConfig;
use crate::net::fetcher::{FetchPolicy, RetryingFetcher};
use crate::types::{parse_price, PriceRecord};

const SOURCE_NAME: &str = "skinout";

const DEFAULT_ENDPOINT: &str = "https://skinout.gg/api/market/items";

/// Stop after this many consecutive empty pages.
const EMPTY_PAGES_THRESHOLD: u32 = 3;

/// Absolute page ceiling.
const MAX_PAGES: u32 = 500;

/// Wall-clock budget for one full sweep.
const MAX_SWEEP_DURATION: Duration = Duration::from_secs(10 * 60);

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SkinoutResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    items: Vec<SkinoutItem>,
}

#[derive(Debug, Deserialize)]
struct SkinoutItem {
    #[serde(default)]
    market_hash_name: String,
    /// Number or string depending on listing type.
    #[serde(default)]
    price: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct SkinoutSource {
    endpoint: String,
    policy: FetchPolicy,
}

impl SkinoutSource {
    pub fn new(cfg: &SourceConfig) -> Self {
        let endpoint = if cfg.endpoint.is_empty() {
            DEFAULT_ENDPOINT.to_string()
        } else {
            cfg.endpoint.clone()
        };

        Self {
            endpoint,
            policy: FetchPolicy::from_source(cfg)
                .with_header("Origin", "https://skinout.gg")
                .with_header("Referer", "https://skinout.gg/"),
        }
    }

    fn parse_page(payload: SkinoutResponse) -> Vec<PriceRecord> {
        if !payload.success {
            warn!("Skinout page flagged unsuccessful");
            return Vec::new();
        }

        let mut records = Vec::with_capacity(payload.items.len());
        for item in payload.items {
            if item.market_hash_name.is_empty() {
                continue;
            }
            let price = match item.price.as_ref().and_then(coerce_price) {
                Some(p) => p,
                None => continue,
            };
            records.push(PriceRecord::new(item.market_hash_name, price));
        }
        records
    }
}

fn coerce_price(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_price(s),
        _ => None,
    }
}

#[async_trait]
impl SourceAdapter for SkinoutSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch_data(&self, http: &RetryingFetcher) -> Result<Vec<PriceRecord>> {
        let started = Instant::now();
        let mut all_records = Vec::new();
        let mut empty_pages = 0u32;

        for page in 0..MAX_PAGES {
            if started.elapsed() > MAX_SWEEP_DURATION {
                warn!(page, "Skinout sweep exceeded time budget, stopping");
                break;
            }

            let url = format!("{}?page={page}", self.endpoint);
            let resp = match http.fetch(SOURCE_NAME, Method::GET, &url, &self.policy).await {
                Some(resp) => resp,
                None => {
                    // Retries already exhausted inside the fetcher; treat
                    // the page as empty and let the threshold decide.
                    empty_pages += 1;
                    if empty_pages >= EMPTY_PAGES_THRESHOLD {
                        break;
                    }
                    continue;
                }
            };

            let payload: SkinoutResponse = match resp.json().await {
                Ok(p) => p,
                Err(e) => {
                    warn!(page, error = %e, "Failed to parse Skinout page");
                    empty_pages += 1;
                    if empty_pages >= EMPTY_PAGES_THRESHOLD {
                        break;
                    }
                    continue;
                }
            };

            let records = Self::parse_page(payload);
            if records.is_empty() {
                empty_pages += 1;
                if empty_pages >= EMPTY_PAGES_THRESHOLD {
                    debug!(page, "Consecutive empty pages, sweep complete");
                    break;
                }
            } else {
                empty_pages = 0;
                debug!(page, count = records.len(), "Skinout page parsed");
                all_records.extend(records);
            }
        }

        info!(count = all_records.len(), "Skinout items parsed");
        Ok(all_records)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page() {
        let payload: SkinoutResponse = serde_json::from_str(
            r#"{
                "success": true,
                "items": [
                    {"market_hash_name": "AK-47 | Redline (Field-Tested)", "price": 25.10},
                    {"market_hash_name": "Nova | Predator", "price": "0,35"}
                ]
            }"#,
        )
        .unwrap();

        let records = SkinoutSource::parse_page(payload);
        assert_eq!(records.len(), 2);
        assert!((records[0].price - 25.10).abs() < 1e-12);
        assert!((records[1].price - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_parse_unsuccessful_page() {
        let payload: SkinoutResponse =
            serde_json::from_str(r#"{"success": false, "items": []}"#).unwrap();
        assert!(SkinoutSource::parse_page(payload).is_empty());
    }

    #[test]
    fn test_parse_skips_broken_items() {
        let payload: SkinoutResponse = serde_json::from_str(
            r#"{
                "success": true,
                "items": [
                    {"market_hash_name": "", "price": 1.0},
                    {"market_hash_name": "No price"},
                    {"market_hash_name": "Ok", "price": "2.50"}
                ]
            }"#,
        )
        .unwrap();
        let records = SkinoutSource::parse_page(payload);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].item_name, "Ok");
    }

    #[test]
    fn test_headers_present() {
        let source = SkinoutSource::new(&SourceConfig::default());
        let names: Vec<&str> = source.policy.headers.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"Origin"));
        assert!(names.contains(&"Referer"));
    }
}
