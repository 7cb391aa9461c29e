//! Reference-marketplace commission schedule.
//!
//! Converts a gross sale price into the net amount the seller actually
//! receives. The schedule is a bracket table: price boundaries map to a
//! flat fee per bracket, and both tables are extended on demand for
//! larger inputs with alternating step sizes. The arithmetic below
//! reproduces the observed schedule exactly — including its oddities —
//! and is pinned by regression tests; do not "correct" it.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;

/// Initial bracket boundaries (inclusive upper edges) in USD.
const BOUNDARIES: [Decimal; 4] = [dec!(0.02), dec!(0.21), dec!(0.32), dec!(0.43)];

/// Per-bracket fees. Deliberately longer than the boundary table; the
/// extension loop keeps them in step.
const FEES: [Decimal; 6] = [
    dec!(0.02),
    dec!(0.03),
    dec!(0.04),
    dec!(0.05),
    dec!(0.07),
    dec!(0.09),
];

/// Net proceeds after commission for a gross sale price.
///
/// Boundaries are extended by +0.12 when the table length is even and
/// +0.11 when odd, until the input is covered; fees extend by +0.01 /
/// +0.02 on the same parity rule until both tables have equal length.
/// The applied fee is the one below the first boundary at or above the
/// input. For inputs at or below the first boundary the index wraps to
/// the last fee — an artifact of the source schedule, kept as is (all
/// real listings price above two cents).
pub fn subtract_fee(gross: f64) -> f64 {
    let input = match Decimal::from_f64(gross) {
        Some(d) => d,
        None => return 0.0,
    };

    let mut boundaries = BOUNDARIES.to_vec();
    let mut fees = FEES.to_vec();

    while input > *boundaries.last().expect("boundary table non-empty") {
        let last = *boundaries.last().expect("boundary table non-empty");
        let step = if boundaries.len() % 2 == 0 {
            dec!(0.12)
        } else {
            dec!(0.11)
        };
        boundaries.push((last + step).round_dp(2));
    }

    while boundaries.len() > fees.len() {
        let last = *fees.last().expect("fee table non-empty");
        let step = if fees.len() % 2 == 0 {
            dec!(0.01)
        } else {
            dec!(0.02)
        };
        fees.push((last + step).round_dp(2));
    }

    let idx = boundaries
        .iter()
        .position(|b| *b >= input)
        .expect("boundaries extended to cover input");
    let fee = if idx == 0 {
        *fees.last().expect("fee table non-empty")
    } else {
        fees[idx - 1]
    };

    // Half-even rounding, matching the schedule's 2-decimal arithmetic.
    (input - fee)
        .round_dp(2)
        .to_f64()
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
