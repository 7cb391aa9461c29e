//! Marketplace source integrations.
//!
//! Defines the `SourceAdapter` trait and provides implementations for
//! the wired marketplaces. Adapters transform raw marketplace payloads
//! into validated `PriceRecord` batches; every outbound call goes
//! through the shared `RetryingFetcher`.
//!
//! Adapters are registered in a name-keyed map built at startup, so the
//! scheduler treats all sources uniformly — including the slow, stateful
//! browser-driven ones.

pub mod csdeals;
pub mod manncostore;
pub mod skinout;
pub mod steam;
pub mod waxpeer;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::net::fetcher::{BrowserSession, RetryingFetcher};
use crate::types::PriceRecord;

/// Abstraction over one marketplace integration (fetch + parse).
///
/// `fetch_data` returns the raw record batch for one cycle; validation
/// and lowest-price dedupe happen in the scheduler before the snapshot
/// is published. Steady-state fetch problems resolve to an empty batch,
/// never an error — `Err` is reserved for conditions that should reach
/// the alert path.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Source key used for snapshots, rate limits and logging.
    fn name(&self) -> &str;

    /// Fetch and parse one cycle's worth of listings.
    async fn fetch_data(&self, http: &RetryingFetcher) -> Result<Vec<PriceRecord>>;
}

/// Name-keyed adapter registry, built once at startup.
pub type SourceRegistry = HashMap<String, Arc<dyn SourceAdapter>>;

/// Construct adapters for every enabled source in the configuration.
///
/// `browser` supplies the session for browser-driven sources; when absent
/// those sources are skipped with a warning rather than failing startup.
pub fn build_registry(
    config: &AppConfig,
    browser: Option<Arc<dyn BrowserSession>>,
) -> SourceRegistry {
    let mut registry: SourceRegistry = HashMap::new();

    for (key, source_cfg) in &config.sources {
        if !source_cfg.enabled {
            continue;
        }

        let adapter: Option<Arc<dyn SourceAdapter>> = match key.as_str() {
            "waxpeer" => Some(Arc::new(waxpeer::WaxpeerSource::new(source_cfg))),
            "csdeals" => Some(Arc::new(csdeals::CsDealsSource::new(source_cfg))),
            "skinout" => Some(Arc::new(skinout::SkinoutSource::new(source_cfg))),
            "steam" => Some(Arc::new(steam::SteamListingSource::new(source_cfg))),
            "manncostore" => match &browser {
                Some(session) => Some(Arc::new(manncostore::ManncoStoreSource::new(
                    source_cfg,
                    Arc::clone(session),
                ))),
                None => {
                    warn!(source = %key, "Browser session not configured, skipping source");
                    None
                }
            },
            other => {
                warn!(source = other, "No adapter for configured source, skipping");
                None
            }
        };

        if let Some(adapter) = adapter {
            registry.insert(key.clone(), adapter);
        }
    }

    info!(count = registry.len(), "Source registry built");
    registry
}
