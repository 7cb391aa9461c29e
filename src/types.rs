//! Shared types for SKIMMER.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that source, scheduler,
//! and arbitrage modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Price records
// ---------------------------------------------------------------------------

/// A single validated listing price from one marketplace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceRecord {
    /// Market hash name of the item (e.g. "AK-47 | Redline (Field-Tested)").
    pub item_name: String,
    /// Lowest observed listing price in USD.
    pub price: f64,
    /// Direct listing URL, when the marketplace provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl fmt::Display for PriceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ ${:.2}", self.item_name, self.price)
    }
}

impl PriceRecord {
    pub fn new(item_name: impl Into<String>, price: f64) -> Self {
        Self {
            item_name: item_name.into(),
            price,
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// The validation gate applied before a record may enter a snapshot:
    /// non-empty name and a finite, non-negative price.
    pub fn validate(&self) -> Result<(), SkimmerError> {
        if self.item_name.trim().is_empty() {
            return Err(SkimmerError::Validation("missing item name".to_string()));
        }
        if !self.price.is_finite() {
            return Err(SkimmerError::Validation(format!(
                "unparsable price for {}",
                self.item_name
            )));
        }
        if self.price < 0.0 {
            return Err(SkimmerError::Validation(format!(
                "negative price for {}",
                self.item_name
            )));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Parse a marketplace price field into USD.
///
/// Accepts plain numbers as well as strings with a currency symbol and
/// either `.` or `,` as the decimal separator ("$12,34" → 12.34).
/// Returns None for anything that does not resolve to a finite number.
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned = raw.replace('$', "").replace(',', ".");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|p| p.is_finite())
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// The complete set of latest validated prices for one source.
///
/// Fully replaces the prior snapshot each cycle. Within one cycle,
/// duplicate item names keep the lower price (sources that list the same
/// item under several sub-listings report it more than once).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub records: HashMap<String, PriceRecord>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            taken_at: Some(Utc::now()),
        }
    }

    /// Build a snapshot from a raw batch: invalid records are dropped and
    /// counted, duplicates keep the lower price. Returns the snapshot and
    /// the number of records dropped by validation.
    pub fn from_records(records: Vec<PriceRecord>) -> (Self, usize) {
        let mut snap = Self::new();
        let mut dropped = 0usize;
        for record in records {
            if !record.is_valid() {
                dropped += 1;
                continue;
            }
            snap.insert(record);
        }
        (snap, dropped)
    }

    /// Insert a record, keeping the cheaper of two listings for the same item.
    pub fn insert(&mut self, record: PriceRecord) {
        match self.records.get(&record.item_name) {
            Some(existing) if existing.price <= record.price => {}
            _ => {
                self.records.insert(record.item_name.clone(), record);
            }
        }
    }

    /// Price lookup by item name.
    pub fn price_of(&self, item_name: &str) -> Option<f64> {
        self.records.get(item_name).map(|r| r.price)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Opportunities
// ---------------------------------------------------------------------------

/// A computed buy/sell pair whose profitability clears a per-source threshold.
///
/// Created fresh each analysis cycle; the full set supersedes the previous
/// active set downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub item_name: String,
    /// Buy-side marketplace identifier (e.g. "waxpeer").
    pub source: String,
    pub buy_price: f64,
    /// Listing page on the buy-side marketplace.
    pub buy_url: String,
    /// Gross price on the reference marketplace.
    pub reference_price: f64,
    /// Reference price after commission fees.
    pub net_reference_price: f64,
    /// Listing page on the reference marketplace.
    pub reference_url: String,
    /// (net_reference − buy) / buy, rounded to 4 decimal places.
    pub profitability: f64,
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | buy {} @ ${:.2} → sell ${:.2} (net ${:.2}) | {:+.2}%",
            self.item_name,
            self.source,
            self.buy_price,
            self.reference_price,
            self.net_reference_price,
            self.profitability_pct(),
        )
    }
}

impl Opportunity {
    /// Absolute profit per unit (net reference proceeds minus buy price).
    pub fn profit(&self) -> f64 {
        self.net_reference_price - self.buy_price
    }

    /// Profitability as a percentage.
    pub fn profitability_pct(&self) -> f64 {
        self.profitability * 100.0
    }
}

// ---------------------------------------------------------------------------
// Source status
// ---------------------------------------------------------------------------

/// Lifecycle state of one scheduled source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceState {
    Idle,
    Running,
    Error,
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceState::Idle => write!(f, "idle"),
            SourceState::Running => write!(f, "running"),
            SourceState::Error => write!(f, "error"),
        }
    }
}

/// Per-source health, kept by the scheduler so stalled sources can be
/// distinguished from healthy ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStatus {
    pub state: SourceState,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub items_last_cycle: usize,
}

impl Default for SourceStatus {
    fn default() -> Self {
        Self {
            state: SourceState::Idle,
            last_success: None,
            consecutive_failures: 0,
            items_last_cycle: 0,
        }
    }
}

impl SourceStatus {
    pub fn record_success(&mut self, items: usize) {
        self.state = SourceState::Idle;
        self.last_success = Some(Utc::now());
        self.consecutive_failures = 0;
        self.items_last_cycle = items;
    }

    pub fn record_failure(&mut self) {
        self.state = SourceState::Error;
        self.consecutive_failures += 1;
        self.items_last_cycle = 0;
    }
}

// ---------------------------------------------------------------------------
// Fetch statistics
// ---------------------------------------------------------------------------

/// Counters kept by the fetch layer across all sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchStats {
    pub requests_made: u64,
    pub requests_failed: u64,
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for SKIMMER.
#[derive(Debug, thiserror::Error)]
pub enum SkimmerError {
    /// Timeout, connection failure, 5xx or 429 — retried with backoff.
    #[error("Transient network error ({source_key}): {message}")]
    Transient { source_key: String, message: String },

    /// Non-429 4xx or an unexpected payload shape — no retry storm.
    #[error("Permanent source error ({source_key}): {message}")]
    Permanent { source_key: String, message: String },

    /// Record rejected by the validation gate — dropped and counted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No available or recoverable proxy.
    #[error("Proxy pool exhausted")]
    ProxyExhausted,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
