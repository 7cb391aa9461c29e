//! Cross-market arbitrage computation.
//!
//! Joins each buy-side snapshot against the reference snapshot, converts
//! the reference price to net proceeds through the fee schedule, filters
//! by each source's minimum-profitability threshold and ranks the result.
//! The whole set is recomputed wholesale every cycle — no incremental
//! diffing; the output fully replaces the previous active set.

pub mod fees;

use rust_decimal::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::types::{Opportunity, PriceRecord, Snapshot};

/// Reference marketplace listing page prefix (app 730 = CS2).
pub const REFERENCE_LISTING_URL: &str = "https://steamcommunity.com/market/listings/730/";

// ---------------------------------------------------------------------------
// Listing URLs
// ---------------------------------------------------------------------------

/// Search/listing URL templates per marketplace: prefix + item + suffix.
fn url_template(source: &str) -> Option<(&'static str, &'static str)> {
    match source {
        "csdeals" => Some(("https://cs.deals/market/csgo/?name=", "&sort=price")),
        "waxpeer" => Some((
            "https://waxpeer.com/?game=csgo&sort=ASC&order=price&all=0&exact=0&search=",
            "",
        )),
        "skinport" => Some(("https://skinport.com/market?search=", "&sort=price&order=asc")),
        "cstrade" => Some(("https://cs.trade/trade?market_name=", "")),
        "marketcsgo" => Some(("https://market.csgo.com/", "")),
        "skinout" => Some(("https://skinout.gg/en/market/", "")),
        "shadowpay" => Some((
            "https://shadowpay.com/csgo-items?search=",
            "&sort_column=price&sort_dir=asc",
        )),
        _ => None,
    }
}

/// Marketplaces whose listing pages use slug-style paths rather than a
/// search query parameter.
fn uses_slug(source: &str) -> bool {
    matches!(source, "skinout" | "marketcsgo")
}

/// Turn an item name into a URL slug: decorations stripped, separators
/// collapsed to single dashes.
pub fn clean_name_for_slug(name: &str) -> String {
    let mut cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | '™'))
        .map(|c| match c {
            ' ' | '|' | '.' => '-',
            other => other,
        })
        .collect();

    while cleaned.contains("--") {
        cleaned = cleaned.replace("--", "-");
    }
    cleaned.trim_matches('-').to_string()
}

/// Listing URL for an item on a buy-side marketplace. A URL carried on
/// the record itself wins; otherwise the per-source template applies.
pub fn build_listing_url(source: &str, record: &PriceRecord) -> String {
    if let Some(url) = &record.url {
        return url.clone();
    }

    match url_template(source) {
        Some((prefix, suffix)) => {
            if uses_slug(source) {
                format!("{prefix}{}{suffix}", clean_name_for_slug(&record.item_name))
            } else {
                format!(
                    "{prefix}{}{suffix}",
                    urlencoding::encode(&record.item_name)
                )
            }
        }
        None => String::new(),
    }
}

/// Reference marketplace listing page for an item.
pub fn reference_listing_url(item_name: &str) -> String {
    format!("{REFERENCE_LISTING_URL}{}", urlencoding::encode(item_name))
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Fee-aware spread computation across all snapshots.
pub struct ArbitrageEngine {
    thresholds: HashMap<String, f64>,
    default_threshold: f64,
}

impl ArbitrageEngine {
    pub fn new(default_threshold: f64) -> Self {
        Self {
            thresholds: HashMap::new(),
            default_threshold,
        }
    }

    /// Set the minimum-profitability ratio for one source.
    pub fn set_threshold(&mut self, source: &str, threshold: f64) {
        self.thresholds.insert(source.to_string(), threshold);
    }

    pub fn threshold_for(&self, source: &str) -> f64 {
        self.thresholds
            .get(source)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    /// Profitability ratio of buying at `buy_price` and selling at a net
    /// reference price. Zero when the buy price is zero (free items are
    /// reported, not divided by).
    pub fn profitability(net_reference: f64, buy_price: f64) -> f64 {
        if buy_price == 0.0 {
            return 0.0;
        }
        round4((net_reference - buy_price) / buy_price)
    }

    /// Compute all qualifying opportunities from the given snapshots,
    /// sorted descending by profitability (stable: ties keep source
    /// order, and item-name order within one source).
    pub fn find_opportunities(
        &self,
        reference: &Snapshot,
        buy_snapshots: &[(String, Snapshot)],
    ) -> Vec<Opportunity> {
        if reference.is_empty() {
            info!("Reference snapshot empty, no opportunities to compute");
            return Vec::new();
        }

        let mut opportunities = Vec::new();
        for (source, snapshot) in buy_snapshots {
            let found = self.process_source(source, snapshot, reference);
            debug!(source = %source, count = found.len(), "Source analysed");
            opportunities.extend(found);
        }

        opportunities.sort_by(|a, b| {
            b.profitability
                .partial_cmp(&a.profitability)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        info!(count = opportunities.len(), "Opportunity scan complete");
        opportunities
    }

    fn process_source(
        &self,
        source: &str,
        snapshot: &Snapshot,
        reference: &Snapshot,
    ) -> Vec<Opportunity> {
        let threshold = self.threshold_for(source);

        // Deterministic traversal: snapshots hash by item name, so walk
        // them in name order.
        let mut names: Vec<&String> = snapshot.records.keys().collect();
        names.sort();

        let mut found = Vec::new();
        for name in names {
            let record = &snapshot.records[name];
            let reference_price = match reference.price_of(name) {
                Some(p) => p,
                None => continue,
            };

            let net_reference = fees::subtract_fee(reference_price);
            let profitability = Self::profitability(net_reference, record.price);
            if profitability < threshold {
                continue;
            }

            found.push(Opportunity {
                item_name: name.clone(),
                source: source.to_string(),
                buy_price: record.price,
                buy_url: build_listing_url(source, record),
                reference_price,
                net_reference_price: net_reference,
                reference_url: reference_listing_url(name),
                profitability,
            });
        }
        found
    }
}

/// Round to 4 decimal places, half-even.
fn round4(value: f64) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(4).to_f64().unwrap_or(value))
        .unwrap_or(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(records: &[(&str, f64)]) -> Snapshot {
        let mut snap = Snapshot::new();
        for (name, price) in records {
            snap.insert(PriceRecord::new(*name, *price));
        }
        snap
    }

    // -- Profitability --

    #[test]
    fn test_profitability_zero_buy_price() {
        assert_eq!(ArbitrageEngine::profitability(10.0, 0.0), 0.0);
        assert_eq!(ArbitrageEngine::profitability(0.0, 0.0), 0.0);
        assert_eq!(ArbitrageEngine::profitability(-5.0, 0.0), 0.0);
    }

    #[test]
    fn test_profitability_rounded_to_four_places() {
        // (27.83 - 25.50) / 25.50 = 0.091372... → 0.0914
        let p = ArbitrageEngine::profitability(27.83, 25.50);
        assert!((p - 0.0914).abs() < 1e-12);
    }

    #[test]
    fn test_profitability_negative_spread() {
        let p = ArbitrageEngine::profitability(8.70, 10.00);
        assert!((p - (-0.13)).abs() < 1e-12);
    }

    // -- Threshold filtering --

    #[test]
    fn test_below_threshold_excluded() {
        let mut engine = ArbitrageEngine::new(0.5);
        engine.set_threshold("waxpeer", 0.10);

        let reference = snapshot(&[("Item A", 10.00)]);
        // net = subtract_fee(10.00) = 8.70 → profitability vs 8.00 ≈ 0.0875
        let buys = vec![("waxpeer".to_string(), snapshot(&[("Item A", 8.00)]))];

        let opps = engine.find_opportunities(&reference, &buys);
        assert!(opps.is_empty());
    }

    #[test]
    fn test_at_threshold_included() {
        let mut engine = ArbitrageEngine::new(0.5);
        engine.set_threshold("waxpeer", 0.0875);

        let reference = snapshot(&[("Item A", 10.00)]);
        let buys = vec![("waxpeer".to_string(), snapshot(&[("Item A", 8.00)]))];

        let opps = engine.find_opportunities(&reference, &buys);
        assert_eq!(opps.len(), 1);
        assert!((opps[0].profitability - 0.0875).abs() < 1e-12);
    }

    #[test]
    fn test_no_opportunity_below_per_source_threshold_ever() {
        let mut engine = ArbitrageEngine::new(0.005);
        engine.set_threshold("strict", 0.25);

        let reference = snapshot(&[("A", 10.00), ("B", 20.00), ("C", 1.00)]);
        let buys = vec![
            ("strict".to_string(), snapshot(&[("A", 7.50), ("B", 13.00), ("C", 0.50)])),
            ("loose".to_string(), snapshot(&[("A", 8.60), ("B", 17.00)])),
        ];

        for opp in engine.find_opportunities(&reference, &buys) {
            assert!(
                opp.profitability >= engine.threshold_for(&opp.source),
                "{} from {} below threshold",
                opp.profitability,
                opp.source
            );
        }
    }

    // -- Join semantics --

    #[test]
    fn test_items_missing_from_reference_skipped() {
        let engine = ArbitrageEngine::new(0.0);
        let reference = snapshot(&[("Known", 10.00)]);
        let buys = vec![(
            "waxpeer".to_string(),
            snapshot(&[("Known", 5.00), ("Unknown", 1.00)]),
        )];

        let opps = engine.find_opportunities(&reference, &buys);
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].item_name, "Known");
    }

    #[test]
    fn test_empty_reference_yields_nothing() {
        let engine = ArbitrageEngine::new(0.0);
        let buys = vec![("waxpeer".to_string(), snapshot(&[("A", 5.00)]))];
        assert!(engine
            .find_opportunities(&Snapshot::new(), &buys)
            .is_empty());
    }

    // -- Ranking --

    #[test]
    fn test_sorted_descending_by_profitability() {
        let engine = ArbitrageEngine::new(0.0);
        let reference = snapshot(&[("A", 10.00), ("B", 10.00), ("C", 10.00)]);
        let buys = vec![(
            "waxpeer".to_string(),
            snapshot(&[("A", 8.00), ("B", 5.00), ("C", 7.00)]),
        )];

        let opps = engine.find_opportunities(&reference, &buys);
        assert_eq!(opps.len(), 3);
        assert_eq!(opps[0].item_name, "B");
        assert_eq!(opps[1].item_name, "C");
        assert_eq!(opps[2].item_name, "A");
    }

    #[test]
    fn test_ties_preserve_source_order() {
        let engine = ArbitrageEngine::new(0.0);
        let reference = snapshot(&[("A", 10.00)]);
        let buys = vec![
            ("first".to_string(), snapshot(&[("A", 8.00)])),
            ("second".to_string(), snapshot(&[("A", 8.00)])),
        ];

        let opps = engine.find_opportunities(&reference, &buys);
        assert_eq!(opps.len(), 2);
        assert_eq!(opps[0].source, "first");
        assert_eq!(opps[1].source, "second");
    }

    // -- End-to-end reference case --

    #[test]
    fn test_redline_end_to_end() {
        let mut engine = ArbitrageEngine::new(0.5);
        engine.set_threshold("waxpeer", 0.005);

        let reference = snapshot(&[("AK-47 Redline", 32.00)]);
        let buys = vec![("waxpeer".to_string(), snapshot(&[("AK-47 Redline", 25.50)]))];

        let opps = engine.find_opportunities(&reference, &buys);
        assert_eq!(opps.len(), 1);
        let opp = &opps[0];
        assert!((opp.net_reference_price - 27.83).abs() < 1e-9);
        assert!((opp.profitability - 0.0914).abs() < 1e-12);
        assert!(opp.profitability >= 0.005);
    }

    // -- URLs --

    #[test]
    fn test_clean_name_for_slug() {
        assert_eq!(
            clean_name_for_slug("AK-47 | Redline (Field-Tested)"),
            "AK-47-Redline-Field-Tested"
        );
        assert_eq!(clean_name_for_slug("StatTrak™ M4A4"), "StatTrak-M4A4");
        assert_eq!(clean_name_for_slug("P250 | Sand Dune"), "P250-Sand-Dune");
    }

    #[test]
    fn test_record_url_wins() {
        let record = PriceRecord::new("AK-47", 1.0).with_url("https://example.com/listing/9");
        assert_eq!(
            build_listing_url("waxpeer", &record),
            "https://example.com/listing/9"
        );
    }

    #[test]
    fn test_template_url_encoded() {
        let record = PriceRecord::new("AK-47 | Redline (Field-Tested)", 1.0);
        let url = build_listing_url("waxpeer", &record);
        assert!(url.starts_with("https://waxpeer.com/"));
        assert!(url.contains("AK-47%20%7C%20Redline"));
    }

    #[test]
    fn test_slug_style_url() {
        let record = PriceRecord::new("AK-47 | Redline (Field-Tested)", 1.0);
        let url = build_listing_url("skinout", &record);
        assert_eq!(
            url,
            "https://skinout.gg/en/market/AK-47-Redline-Field-Tested"
        );
    }

    #[test]
    fn test_unknown_source_empty_url() {
        let record = PriceRecord::new("AK-47", 1.0);
        assert_eq!(build_listing_url("mystery", &record), "");
    }

    #[test]
    fn test_reference_listing_url() {
        assert_eq!(
            reference_listing_url("AK-47 | Redline (Field-Tested)"),
            "https://steamcommunity.com/market/listings/730/AK-47%20%7C%20Redline%20%28Field-Tested%29"
        );
    }
}
