//! Confidence score for one aggregation round, 0..=100.
//!
//! | component  | weight | full marks when                                   |
//! |------------|--------|---------------------------------------------------|
//! | sources    | 30     | valid sources ≥ target                            |
//! | freshness  | 25     | every observation is brand new                    |
//! | agreement  | 25     | every valid source reports the median exactly     |
//! | stability  | 20     | median equals the TWAP                            |
//!
//! HIGH and CRITICAL breaker levels subtract a flat penalty.

use fairsettle_types::BreakerLevel;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

const SOURCES_WEIGHT: i64 = 30;
const FRESHNESS_WEIGHT: i64 = 25;
const AGREEMENT_WEIGHT: i64 = 25;
const STABILITY_WEIGHT: i64 = 20;

const HIGH_PENALTY: u8 = 10;
const CRITICAL_PENALTY: u8 = 25;

/// Normalized inputs, each component in `0..=1`.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceInputs {
    pub valid_sources: usize,
    pub target_sources: usize,
    pub freshness: Decimal,
    pub agreement: Decimal,
    pub stability: Decimal,
    pub level: BreakerLevel,
}

#[must_use]
pub fn score(inputs: &ConfidenceInputs) -> u8 {
    let sources = if inputs.target_sources == 0 {
        Decimal::ONE
    } else {
        let n = inputs.valid_sources.min(inputs.target_sources);
        Decimal::from(n) / Decimal::from(inputs.target_sources)
    };

    let total = sources * Decimal::from(SOURCES_WEIGHT)
        + clamp_unit(inputs.freshness) * Decimal::from(FRESHNESS_WEIGHT)
        + clamp_unit(inputs.agreement) * Decimal::from(AGREEMENT_WEIGHT)
        + clamp_unit(inputs.stability) * Decimal::from(STABILITY_WEIGHT);

    let raw = total.round().to_u8().unwrap_or(0).min(100);
    let penalty = match inputs.level {
        BreakerLevel::High => HIGH_PENALTY,
        BreakerLevel::Critical => CRITICAL_PENALTY,
        _ => 0,
    };
    raw.saturating_sub(penalty)
}

/// `1 − min(value / bound, 1)`: 1 at zero, 0 at or beyond `bound`.
#[must_use]
pub fn complement_within(value: Decimal, bound: Decimal) -> Decimal {
    if bound <= Decimal::ZERO {
        return if value <= Decimal::ZERO {
            Decimal::ONE
        } else {
            Decimal::ZERO
        };
    }
    Decimal::ONE - (value.abs() / bound).min(Decimal::ONE)
}

fn clamp_unit(v: Decimal) -> Decimal {
    v.max(Decimal::ZERO).min(Decimal::ONE)
}
