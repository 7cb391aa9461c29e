//! CS.deals integration.
//!
//! Single JSON call to the public lowest-price endpoint. The payload
//! nests items under `response.items`; prices come back either as
//! numbers or strings depending on endpoint version, so both are
//! accepted.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tracing::{info, warn};

use super::SourceAdapter;
use crate::config::SourceConfig;
use crate::net::fetcher::{FetchPolicy, RetryingFetcher};
use crate::types::{parse_price, PriceRecord};

const SOURCE_NAME: &str = "csdeals";

const DEFAULT_ENDPOINT: &str = "https://cs.deals/API/IPricing/GetLowestPrices/v1?appid=730";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CsDealsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    response: Option<CsDealsInner>,
}

#[derive(Debug, Deserialize)]
struct CsDealsInner {
    #[serde(default)]
    items: Vec<CsDealsItem>,
}

#[derive(Debug, Deserialize)]
struct CsDealsItem {
    #[serde(default)]
    marketname: String,
    /// Number or string depending on the API version.
    #[serde(default)]
    lowest_price: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct CsDealsSource {
    endpoint: String,
    policy: FetchPolicy,
}

impl CsDealsSource {
    pub fn new(cfg: &SourceConfig) -> Self {
        let endpoint = if cfg.endpoint.is_empty() {
            DEFAULT_ENDPOINT.to_string()
        } else {
            cfg.endpoint.clone()
        };

        Self {
            endpoint,
            policy: FetchPolicy::from_source(cfg).with_header("Referer", "https://cs.deals/"),
        }
    }

    fn coerce_price(value: &serde_json::Value) -> Option<f64> {
        match value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => parse_price(s),
            _ => None,
        }
    }

    fn parse(payload: CsDealsResponse) -> Vec<PriceRecord> {
        if !payload.success {
            warn!("CS.deals response flagged unsuccessful");
            return Vec::new();
        }

        let inner = match payload.response {
            Some(inner) => inner,
            None => {
                warn!("CS.deals payload missing response body");
                return Vec::new();
            }
        };

        let mut records = Vec::with_capacity(inner.items.len());
        for item in inner.items {
            if item.marketname.is_empty() {
                continue;
            }
            let price = match item.lowest_price.as_ref().and_then(Self::coerce_price) {
                Some(p) => p,
                None => continue,
            };
            records.push(PriceRecord::new(item.marketname, price));
        }
        records
    }
}

#[async_trait]
impl SourceAdapter for CsDealsSource {
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

        let payload: CsDealsResponse = match resp.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Failed to parse CS.deals response");
                return Ok(Vec::new());
            }
        };

        let records = Self::parse(payload);
        info!(count = records.len(), "CS.deals items parsed");
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
