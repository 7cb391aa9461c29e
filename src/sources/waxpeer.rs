//! Waxpeer integration.
//!
//! Single JSON call returning every listed item with its minimum price.
//! Prices arrive as integers with three implied decimals (1234 = $1.234).
//!
//! API docs: https://docs.waxpeer.com/
//! Auth: optional `Authorization: Bearer {key}` for private endpoints.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tracing::{info, warn};

use super::SourceAdapter;
use crate::config::SourceConfig;
use crate::net::fetcher::{FetchPolicy, RetryingFetcher};
use crate::types::PriceRecord;

const SOURCE_NAME: &str = "waxpeer";

const DEFAULT_ENDPOINT: &str =
    "https://api.waxpeer.com/v1/prices?game=csgo&minified=0&single=0";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WaxpeerResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    items: Vec<WaxpeerItem>,
}

#[derive(Debug, Deserialize)]
struct WaxpeerItem {
    #[serde(default)]
    name: String,
    /// Minimum listing price in 1/1000 USD.
    #[serde(default)]
    min: u64,
    #[serde(default)]
    steam_market_hash_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct WaxpeerSource {
    endpoint: String,
    policy: FetchPolicy,
}

impl WaxpeerSource {
    pub fn new(cfg: &SourceConfig) -> Self {
        let endpoint = if cfg.endpoint.is_empty() {
            DEFAULT_ENDPOINT.to_string()
        } else {
            cfg.endpoint.clone()
        };

        let mut policy = FetchPolicy::from_source(cfg);
        if let Some(env) = &cfg.api_key_env {
            if let Ok(key) = std::env::var(env) {
                policy = policy.with_header("Authorization", format!("Bearer {key}"));
            }
        }

        Self { endpoint, policy }
    }

    /// Convert a mills price (three implied decimals) to dollars.
    fn mills_to_dollars(mills: u64) -> f64 {
        mills as f64 / 1000.0
    }

    fn parse(payload: WaxpeerResponse) -> Vec<PriceRecord> {
        if !payload.success {
            warn!("Waxpeer response flagged unsuccessful");
            return Vec::new();
        }

        let mut records = Vec::with_capacity(payload.items.len());
        for item in payload.items {
            if item.name.is_empty() {
                continue;
            }

            let mut record =
                PriceRecord::new(item.name.clone(), Self::mills_to_dollars(item.min));
            if item.steam_market_hash_name.is_some() {
                record = record.with_url(format!(
                    "https://waxpeer.com/?game=csgo&search={}",
                    urlencoding::encode(&item.name)
                ));
            }
            records.push(record);
        }
        records
    }
}

#[async_trait]
impl SourceAdapter for WaxpeerSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch_data(&self, http: &RetryingFetcher) -> Result<Vec<PriceRecord>> {
        let resp = match http
            .fetch(SOURCE_NAME, Method::GET, &self.endpoint, &self.policy)
            .await
        {
            Some(resp) => resp,
            None => return Ok(Vec::new()),
        };

        let payload: WaxpeerResponse = match resp.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Failed to parse Waxpeer response");
                return Ok(Vec::new());
            }
        };

        let records = Self::parse(payload);
        info!(count = records.len(), "Waxpeer items parsed");
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mills_to_dollars() {
        assert!((WaxpeerSource::mills_to_dollars(1234) - 1.234).abs() < 1e-12);
        assert!((WaxpeerSource::mills_to_dollars(50) - 0.050).abs() < 1e-12);
        assert!((WaxpeerSource::mills_to_dollars(0) - 0.0).abs() < 1e-12);
        assert!((WaxpeerSource::mills_to_dollars(25_503) - 25.503).abs() < 1e-12);
    }

    #[test]
    fn test_parse_success_payload() {
        let payload: WaxpeerResponse = serde_json::from_str(
            r#"{
                "success": true,
                "items": [
                    {"name": "AK-47 | Redline (Field-Tested)", "min": 25503,
                     "steam_market_hash_name": "AK-47 | Redline (Field-Tested)"},
                    {"name": "Glock-18 | Sand Dune", "min": 40}
                ]
            }"#,
        )
        .unwrap();

        let records = WaxpeerSource::parse(payload);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].item_name, "AK-47 | Redline (Field-Tested)");
        assert!((records[0].price - 25.503).abs() < 1e-12);
        assert!(records[0].url.as_deref().unwrap().contains("waxpeer.com"));
        assert!(records[1].url.is_none());
    }

    #[test]
    fn test_parse_unsuccessful_payload() {
        let payload: WaxpeerResponse =
            serde_json::from_str(r#"{"success": false, "items": [{"name": "X", "min": 1}]}"#)
                .unwrap();
        assert!(WaxpeerSource::parse(payload).is_empty());
    }

    #[test]
    fn test_parse_skips_nameless_items() {
        let payload: WaxpeerResponse = serde_json::from_str(
            r#"{"success": true, "items": [{"min": 100}, {"name": "Real", "min": 200}]}"#,
        )
        .unwrap();
        let records = WaxpeerSource::parse(payload);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].item_name, "Real");
    }

    #[test]
    fn test_default_endpoint_when_unconfigured() {
        let source = WaxpeerSource::new(&SourceConfig::default());
        assert_eq!(source.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(source.name(), "waxpeer");
    }
}
