//! Price observation and aggregate types shared by the oracle and the engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{BlockHeight, SourceId, constants};

/// Delivery style of a price source. Classes differ in how stale a reading
/// may be and in how much initial trust they receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum SourceClass {
    /// Latest-round feeds written on-chain by a reporter network.
    Push,
    /// On-demand feeds pulled with a signed update at query time.
    Pull,
    /// Self-operated or experimental feeds.
    Custom,
}

impl SourceClass {
    /// Reliability a freshly configured source of this class starts with.
    #[must_use]
    pub fn seed_reliability(self) -> u8 {
        match self {
            Self::Push => constants::PUSH_SEED_RELIABILITY,
            Self::Pull => constants::PULL_SEED_RELIABILITY,
            Self::Custom => constants::CUSTOM_SEED_RELIABILITY,
        }
    }
}

impl std::fmt::Display for SourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => write!(f, "PUSH"),
            Self::Pull => write!(f, "PULL"),
            Self::Custom => write!(f, "CUSTOM"),
        }
    }
}

/// One reading from one source, produced per aggregation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub source_id: SourceId,
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// Circuit-breaker severity. Ordered: `Normal < … < Emergency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum BreakerLevel {
    Normal,
    Elevated,
    High,
    Critical,
    /// Blocks every price-dependent operation until an admin reset.
    Emergency,
}

impl BreakerLevel {
    /// Raise severity by `steps`, saturating at `Emergency`.
    #[must_use]
    pub fn escalated(self, steps: u8) -> Self {
        let mut level = self;
        for _ in 0..steps {
            level = match level {
                Self::Normal => Self::Elevated,
                Self::Elevated => Self::High,
                Self::High => Self::Critical,
                Self::Critical | Self::Emergency => Self::Emergency,
            };
        }
        level
    }

    /// Lower severity by one. `Emergency` only clears through an admin reset.
    #[must_use]
    pub fn relaxed(self) -> Self {
        match self {
            Self::Normal | Self::Elevated => Self::Normal,
            Self::High => Self::Elevated,
            Self::Critical => Self::High,
            Self::Emergency => Self::Emergency,
        }
    }
}

impl std::fmt::Display for BreakerLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Elevated => write!(f, "ELEVATED"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
            Self::Emergency => write!(f, "EMERGENCY"),
        }
    }
}

/// Why an aggregate was not reliable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnreliableReason {
    /// Fewer valid, non-outlier observations than the BFT minimum.
    InsufficientSources { required: usize, available: usize },
    /// This round escalated the circuit breaker to EMERGENCY.
    CircuitBreaker { level: BreakerLevel },
}

impl std::fmt::Display for UnreliableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientSources {
                required,
                available,
            } => write!(f, "{available} valid sources, {required} required"),
            Self::CircuitBreaker { level } => write!(f, "circuit breaker at {level}"),
        }
    }
}

/// The aggregator's verdict on one aggregation round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceVerdict {
    Reliable,
    Unreliable(UnreliableReason),
}

/// The result of one aggregation round.
///
/// When the verdict is `Unreliable` the price fields are zero and must not
/// be used; [`AggregatedPrice::reliable_median`] enforces that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedPrice {
    /// BFT median of the valid, non-outlier set.
    pub median: Decimal,
    /// Mean weighted by each contributing source's reliability score.
    pub weighted_mean: Decimal,
    /// Time-weighted average over the rolling history window.
    pub twap: Decimal,
    /// 0..=100.
    pub confidence: u8,
    pub valid_sources: usize,
    pub outliers: usize,
    pub verdict: PriceVerdict,
    pub height: BlockHeight,
    pub computed_at: DateTime<Utc>,
}

impl AggregatedPrice {
    #[must_use]
    pub fn is_reliable(&self) -> bool {
        self.verdict == PriceVerdict::Reliable
    }

    /// The median, or an oracle error when the round was unreliable.
    pub fn reliable_median(&self) -> crate::Result<Decimal> {
        match &self.verdict {
            PriceVerdict::Reliable => Ok(self.median),
            PriceVerdict::Unreliable(reason) => Err(crate::FairsettleError::PriceUnreliable {
                reason: reason.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_reliability_ranks_mature_classes_higher() {
        assert!(SourceClass::Push.seed_reliability() > SourceClass::Pull.seed_reliability());
        assert!(SourceClass::Pull.seed_reliability() > SourceClass::Custom.seed_reliability());
        assert_eq!(SourceClass::Push.seed_reliability(), 95);
        assert_eq!(SourceClass::Pull.seed_reliability(), 75);
    }

    #[test]
    fn breaker_escalation_saturates() {
        assert_eq!(BreakerLevel::Normal.escalated(1), BreakerLevel::Elevated);
        assert_eq!(BreakerLevel::Normal.escalated(2), BreakerLevel::High);
        assert_eq!(BreakerLevel::Critical.escalated(3), BreakerLevel::Emergency);
        assert!(BreakerLevel::High < BreakerLevel::Emergency);
    }

    #[test]
    fn emergency_does_not_relax() {
        assert_eq!(BreakerLevel::Emergency.relaxed(), BreakerLevel::Emergency);
        assert_eq!(BreakerLevel::Critical.relaxed(), BreakerLevel::High);
        assert_eq!(BreakerLevel::Normal.relaxed(), BreakerLevel::Normal);
    }

    #[test]
    fn unreliable_median_is_an_oracle_error() {
        let agg = AggregatedPrice {
            median: Decimal::ZERO,
            weighted_mean: Decimal::ZERO,
            twap: Decimal::ZERO,
            confidence: 0,
            valid_sources: 2,
            outliers: 0,
            verdict: PriceVerdict::Unreliable(UnreliableReason::InsufficientSources {
                required: 3,
                available: 2,
            }),
            height: BlockHeight(1),
            computed_at: DateTime::<Utc>::UNIX_EPOCH,
        };
        let err = agg.reliable_median().unwrap_err();
        assert_eq!(err.class(), crate::ErrorClass::Oracle);
    }
}
