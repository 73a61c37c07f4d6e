//! # fairsettle-oracle
//!
//! **Oracle Plane**: combines many untrusted price readings into one
//! Byzantine-resistant aggregate.
//!
//! ## Round pipeline
//!
//! ```text
//! active sources ──► validity ──► median ──► outlier drop ──► median'
//!                                                  │
//!                      reliability scores ◄────────┤
//!                      circuit breaker    ◄────────┤
//!                      history / TWAP     ◄────────┘ (reliable rounds only)
//! ```
//!
//! - [`source`]: the [`PriceSource`] capability and per-source registry entry
//! - [`aggregator`]: [`OracleAggregator`], the round pipeline above
//! - [`history`]: bounded ring buffer and TWAP
//! - [`confidence`]: 0..=100 confidence scoring
//! - [`circuit_breaker`]: graduated breaker over aggregate movement

pub mod aggregator;
pub mod circuit_breaker;
pub mod confidence;
pub mod history;
#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;
pub mod source;

pub use aggregator::{OracleAggregator, median};
pub use circuit_breaker::CircuitBreaker;
pub use history::PriceHistory;
#[cfg(any(test, feature = "test-helpers"))]
pub use mock::MockPriceSource;
pub use source::{FeedSelector, PriceSource, SourceConfig, SourceFailure, SourceQuote};
