//! Price-source capability and per-source configuration.
//!
//! The aggregator is agnostic to whether a reading comes from a push-style
//! latest-round feed or a pull-style on-demand feed. Vendor adapters live
//! outside the core and translate each network's native response into a
//! [`SourceQuote`] behind the [`PriceSource`] trait.

use chrono::{DateTime, Utc};
use fairsettle_types::{AccountId, SourceClass, SourceId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Vendor-specific feed selector (price id, aggregator address, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedSelector(pub [u8; 32]);

/// What a source returned for one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceQuote {
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
    /// Confidence interval half-width, when the network reports one.
    pub confidence: Option<Decimal>,
}

impl SourceQuote {
    #[must_use]
    pub fn new(price: Decimal, observed_at: DateTime<Utc>) -> Self {
        Self {
            price,
            observed_at,
            confidence: None,
        }
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: Decimal) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// A read that produced no usable quote.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceFailure {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Capability to read one configured source.
///
/// Each call returns an explicit per-source result, so one misbehaving
/// source cannot abort an aggregation round.
pub trait PriceSource {
    fn get_price(&self, source: &SourceConfig) -> Result<SourceQuote, SourceFailure>;
}

/// Registry entry for one price source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: SourceId,
    pub class: SourceClass,
    pub identity: AccountId,
    pub feed: FeedSelector,
    pub active: bool,
    /// 0..=100.
    pub reliability: u8,
    pub consecutive_failures: u32,
}

impl SourceConfig {
    #[must_use]
    pub fn new(id: SourceId, class: SourceClass, identity: AccountId, feed: FeedSelector) -> Self {
        Self {
            id,
            class,
            identity,
            feed,
            active: true,
            reliability: class.seed_reliability(),
            consecutive_failures: 0,
        }
    }

    /// A read passed every check and survived outlier removal.
    pub fn record_success(&mut self, recovery_step: u8) {
        self.reliability = self.reliability.saturating_add(recovery_step).min(100);
        self.consecutive_failures = 0;
    }

    /// A read failed, was stale or out of range, or was an outlier.
    ///
    /// Returns `true` if this failure auto-disabled the source.
    pub fn record_failure(&mut self, decay_step: u8, max_consecutive_failures: u32) -> bool {
        self.reliability = self.reliability.saturating_sub(decay_step);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.active && self.consecutive_failures >= max_consecutive_failures {
            self.active = false;
            return true;
        }
        false
    }
}
