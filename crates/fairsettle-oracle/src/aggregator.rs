//! BFT multi-source price aggregation.
//!
//! One round of [`OracleAggregator::get_aggregated_price`] runs in a fixed
//! order:
//!
//! 1. **Validity**: read every active source; drop failed reads, stale or
//!    future-dated observations, prices outside the sanity range, and quotes
//!    whose reported confidence interval is too wide.
//! 2. **Outliers**: take the median of the survivors, drop anything more
//!    than the outlier threshold away from it, and recompute the median.
//! 3. **Scores**: survivors recover reliability, everything dropped in steps
//!    1-2 decays and may be auto-disabled.
//! 4. **Breaker**: an undersized round or a large move against the previous
//!    reliable median escalates the circuit breaker.
//!
//! Only reliable rounds are appended to the history ring buffer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fairsettle_types::{
    AccountId, AggregatedPrice, BreakerLevel, ChainView, EventPayload, FairsettleError,
    OracleParams, PriceObservation, PriceVerdict, Result, SourceClass, SourceId,
    UnreliableReason,
};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::confidence::{self, ConfidenceInputs, complement_within};
use crate::history::PriceHistory;
use crate::source::{FeedSelector, PriceSource, SourceConfig, SourceFailure, SourceQuote};

/// Extra valid sources beyond the BFT minimum needed for full marks on the
/// source-count component of the confidence score.
const CONFIDENCE_SOURCE_HEADROOM: usize = 2;

#[derive(Debug, thiserror::Error)]
enum Rejection {
    #[error(transparent)]
    Failed(SourceFailure),
    #[error("stale: age {age_secs}s exceeds {bound_secs}s")]
    Stale { age_secs: i64, bound_secs: u64 },
    #[error("observed in the future")]
    FutureDated,
    #[error("price {0} outside sanity range")]
    OutOfRange(Decimal),
    #[error("confidence interval {0} too wide")]
    WideConfidence(Decimal),
}

/// An observation that passed every validity check.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    observation: PriceObservation,
    age_secs: i64,
    staleness_bound: u64,
    reliability: u8,
}

/// Owns the source registry, price history, and circuit breaker.
pub struct OracleAggregator<S> {
    params: OracleParams,
    feed: S,
    sources: BTreeMap<SourceId, SourceConfig>,
    next_source_id: u32,
    history: PriceHistory,
    breaker: CircuitBreaker,
    latest: Option<AggregatedPrice>,
    pending_events: Vec<EventPayload>,
}

impl<S: PriceSource> OracleAggregator<S> {
    #[must_use]
    pub fn new(params: OracleParams, feed: S) -> Self {
        let history = PriceHistory::new(params.history_capacity.max(1));
        let breaker = CircuitBreaker::new(
            params.breaker_deviation_ratio(),
            params.breaker_cooldown_aggregates,
        );
        Self {
            params,
            feed,
            sources: BTreeMap::new(),
            next_source_id: 1,
            history,
            breaker,
            latest: None,
            pending_events: Vec::new(),
        }
    }

    // ── Registry ─────────────────────────────────────────────────────

    /// Register a source, or reconfigure the one already using `identity`.
    ///
    /// Either way the source comes back active with its class's seeded
    /// reliability and a cleared failure counter.
    pub fn configure_source(
        &mut self,
        class: SourceClass,
        identity: AccountId,
        feed: FeedSelector,
    ) -> Result<SourceId> {
        if identity.is_null() {
            return Err(FairsettleError::NullAddress {
                what: "source identity",
            });
        }

        let existing = self
            .sources
            .values()
            .find(|s| s.identity == identity)
            .map(|s| s.id);
        let id = if let Some(id) = existing {
            id
        } else {
            let id = SourceId(self.next_source_id);
            self.next_source_id = self
                .next_source_id
                .checked_add(1)
                .ok_or_else(|| FairsettleError::Internal("source id space exhausted".into()))?;
            id
        };
        self.sources
            .insert(id, SourceConfig::new(id, class, identity, feed));

        info!(source = %id, %class, identity = %identity.short(), "price source configured");
        self.pending_events.push(EventPayload::SourceConfigured {
            source_id: id,
            class,
            identity,
        });
        Ok(id)
    }

    /// Enable or disable one source without losing its configuration.
    ///
    /// Re-enabling clears the consecutive-failure counter.
    pub fn set_source_active(&mut self, id: SourceId, active: bool) -> Result<()> {
        let cfg = self
            .sources
            .get_mut(&id)
            .ok_or(FairsettleError::SourceNotFound(id))?;
        if cfg.active == active {
            return Ok(());
        }
        cfg.active = active;
        if active {
            cfg.consecutive_failures = 0;
        }
        info!(source = %id, active, "price source toggled");
        self.pending_events.push(EventPayload::SourceToggled {
            source_id: id,
            active,
        });
        Ok(())
    }

    /// Enable or disable every source of `class`. Returns how many changed.
    ///
    /// Same per-source effects as [`set_source_active`](Self::set_source_active).
    pub fn set_class_active(&mut self, class: SourceClass, active: bool) -> usize {
        let mut changed = 0;
        for cfg in self
            .sources
            .values_mut()
            .filter(|s| s.class == class && s.active != active)
        {
            cfg.active = active;
            if active {
                cfg.consecutive_failures = 0;
            }
            changed += 1;
            self.pending_events.push(EventPayload::SourceToggled {
                source_id: cfg.id,
                active,
            });
        }
        info!(%class, active, changed, "price source class toggled");
        changed
    }

    #[must_use]
    pub fn source(&self, id: SourceId) -> Option<&SourceConfig> {
        self.sources.get(&id)
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.values()
    }

    #[must_use]
    pub fn active_source_count(&self) -> usize {
        self.sources.values().filter(|s| s.active).count()
    }

    // ── Breaker / status ─────────────────────────────────────────────

    #[must_use]
    pub fn breaker_level(&self) -> BreakerLevel {
        self.breaker.level()
    }

    /// Admin reset of the circuit breaker to NORMAL.
    pub fn reset_circuit_breaker(&mut self) {
        if let Some((from, to)) = self.breaker.reset() {
            self.pending_events
                .push(EventPayload::CircuitBreakerChanged { from, to });
        }
    }

    /// The most recent round's result, reliable or not.
    #[must_use]
    pub fn latest(&self) -> Option<&AggregatedPrice> {
        self.latest.as_ref()
    }

    #[must_use]
    pub fn history(&self) -> &PriceHistory {
        &self.history
    }

    #[must_use]
    pub fn params(&self) -> &OracleParams {
        &self.params
    }

    #[must_use]
    pub fn feed(&self) -> &S {
        &self.feed
    }

    pub fn feed_mut(&mut self) -> &mut S {
        &mut self.feed
    }

    /// Drain the events produced since the last call.
    pub fn take_events(&mut self) -> Vec<EventPayload> {
        std::mem::take(&mut self.pending_events)
    }

    // ── Aggregation ──────────────────────────────────────────────────

    /// Run one aggregation round against the current chain view.
    ///
    /// An undersized round is not an error: it returns an `Unreliable`
    /// aggregate. The only error is a breaker already at EMERGENCY, which
    /// refuses the round without touching any state.
    pub fn get_aggregated_price(&mut self, chain: &ChainView) -> Result<AggregatedPrice> {
        if self.breaker.is_tripped() {
            warn!(height = %chain.height, "aggregation refused: circuit breaker at EMERGENCY");
            return Err(FairsettleError::CircuitBreakerTripped);
        }
        let now = chain.timestamp;

        // 1. validity
        let mut candidates = Vec::with_capacity(self.sources.len());
        let mut rejected = Vec::new();
        for cfg in self.sources.values().filter(|s| s.active) {
            let outcome = self
                .feed
                .get_price(cfg)
                .map_err(Rejection::Failed)
                .and_then(|quote| self.validate(cfg, &quote, now));
            match outcome {
                Ok(candidate) => {
                    debug!(
                        source = %cfg.id,
                        price = %candidate.observation.price,
                        age_secs = candidate.age_secs,
                        "observation accepted"
                    );
                    candidates.push(candidate);
                }
                Err(rejection) => {
                    warn!(source = %cfg.id, class = %cfg.class, %rejection, "observation rejected");
                    rejected.push(cfg.id);
                }
            }
        }

        // 2. outliers
        let (kept, outliers) = self.split_outliers(candidates);
        for c in &outliers {
            warn!(
                source = %c.observation.source_id,
                price = %c.observation.price,
                "observation dropped as outlier"
            );
        }

        // 3. scores
        for c in &kept {
            if let Some(cfg) = self.sources.get_mut(&c.observation.source_id) {
                cfg.record_success(self.params.recovery_step);
            }
        }
        for id in rejected
            .iter()
            .copied()
            .chain(outliers.iter().map(|c| c.observation.source_id))
        {
            self.penalize(id);
        }

        // 4. breaker + verdict
        let aggregate = self.conclude(chain, &kept, outliers.len());
        self.latest = Some(aggregate.clone());
        Ok(aggregate)
    }

    fn validate(
        &self,
        cfg: &SourceConfig,
        quote: &SourceQuote,
        now: DateTime<Utc>,
    ) -> std::result::Result<Candidate, Rejection> {
        if quote.observed_at > now {
            return Err(Rejection::FutureDated);
        }
        let age_secs = (now - quote.observed_at).num_seconds();
        let bound = self.params.staleness_bound(cfg.class);
        if u64::try_from(age_secs).map_or(true, |age| age > bound) {
            return Err(Rejection::Stale {
                age_secs,
                bound_secs: bound,
            });
        }
        if quote.price < self.params.min_price || quote.price > self.params.max_price {
            return Err(Rejection::OutOfRange(quote.price));
        }
        if let Some(interval) = quote.confidence {
            if interval.abs() / quote.price > self.params.max_confidence_ratio() {
                return Err(Rejection::WideConfidence(interval));
            }
        }
        Ok(Candidate {
            observation: PriceObservation {
                source_id: cfg.id,
                price: quote.price,
                observed_at: quote.observed_at,
            },
            age_secs,
            staleness_bound: bound,
            reliability: cfg.reliability,
        })
    }

    fn split_outliers(&self, candidates: Vec<Candidate>) -> (Vec<Candidate>, Vec<Candidate>) {
        let prices: Vec<Decimal> = candidates.iter().map(|c| c.observation.price).collect();
        let Some(reference) = median(&prices) else {
            return (candidates, Vec::new());
        };
        let ratio = self.params.outlier_ratio();
        candidates
            .into_iter()
            .partition(|c| (c.observation.price - reference).abs() / reference <= ratio)
    }

    fn penalize(&mut self, id: SourceId) {
        let Some(cfg) = self.sources.get_mut(&id) else {
            return;
        };
        let disabled =
            cfg.record_failure(self.params.decay_step, self.params.max_consecutive_failures);
        if disabled {
            warn!(
                source = %id,
                consecutive_failures = cfg.consecutive_failures,
                "price source auto-disabled"
            );
            self.pending_events.push(EventPayload::SourceAutoDisabled {
                source_id: id,
                consecutive_failures: cfg.consecutive_failures,
            });
        }
    }

    fn note_breaker(&mut self, change: Option<(BreakerLevel, BreakerLevel)>) {
        if let Some((from, to)) = change {
            self.pending_events
                .push(EventPayload::CircuitBreakerChanged { from, to });
        }
    }

    fn conclude(&mut self, chain: &ChainView, kept: &[Candidate], outliers: usize) -> AggregatedPrice {
        let now = chain.timestamp;
        let required = self.params.bft_min_sources;
        let unreliable = |reason: UnreliableReason| AggregatedPrice {
            median: Decimal::ZERO,
            weighted_mean: Decimal::ZERO,
            twap: Decimal::ZERO,
            confidence: 0,
            valid_sources: kept.len(),
            outliers,
            verdict: PriceVerdict::Unreliable(reason),
            height: chain.height,
            computed_at: now,
        };

        let prices: Vec<Decimal> = kept.iter().map(|c| c.observation.price).collect();
        let median = match median(&prices) {
            Some(m) if kept.len() >= required => m,
            _ => {
                let change = self.breaker.record_insufficient();
                self.note_breaker(change);
                warn!(
                    height = %chain.height,
                    valid = kept.len(),
                    required,
                    "aggregate unreliable: insufficient valid sources"
                );
                return unreliable(UnreliableReason::InsufficientSources {
                    required,
                    available: kept.len(),
                });
            }
        };

        let change = self.breaker.record_median(median);
        self.note_breaker(change);
        if self.breaker.is_tripped() {
            warn!(height = %chain.height, %median, "aggregate unreliable: circuit breaker tripped");
            return unreliable(UnreliableReason::CircuitBreaker {
                level: BreakerLevel::Emergency,
            });
        }

        self.history.push(now, median);
        let twap = self
            .history
            .twap(now, self.params.twap_window_secs)
            .unwrap_or(median);
        let weighted_mean = weighted_mean(kept).unwrap_or(median);
        let confidence = confidence::score(&self.confidence_inputs(kept, median, twap));

        info!(
            height = %chain.height,
            %median,
            %twap,
            confidence,
            valid = kept.len(),
            outliers,
            "price aggregated"
        );

        AggregatedPrice {
            median,
            weighted_mean,
            twap,
            confidence,
            valid_sources: kept.len(),
            outliers,
            verdict: PriceVerdict::Reliable,
            height: chain.height,
            computed_at: now,
        }
    }

    fn confidence_inputs(&self, kept: &[Candidate], median: Decimal, twap: Decimal) -> ConfidenceInputs {
        let n = Decimal::from(kept.len().max(1));
        let freshness = kept
            .iter()
            .map(|c| {
                complement_within(Decimal::from(c.age_secs), Decimal::from(c.staleness_bound))
            })
            .sum::<Decimal>()
            / n;
        let spread = kept
            .iter()
            .map(|c| (c.observation.price - median).abs() / median)
            .max()
            .unwrap_or(Decimal::ZERO);
        let drift = if twap > Decimal::ZERO {
            (median - twap).abs() / twap
        } else {
            Decimal::ZERO
        };
        ConfidenceInputs {
            valid_sources: kept.len(),
            target_sources: self.params.bft_min_sources + CONFIDENCE_SOURCE_HEADROOM,
            freshness,
            agreement: complement_within(spread, self.params.outlier_ratio()),
            stability: complement_within(drift, self.params.breaker_deviation_ratio()),
            level: self.breaker.level(),
        }
    }
}

/// Median of `values`; the mean of the middle pair for even counts.
#[must_use]
pub fn median(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / Decimal::from(2))
    } else {
        Some(sorted[mid])
    }
}

/// Mean weighted by reliability; `None` when every weight is zero.
fn weighted_mean(kept: &[Candidate]) -> Option<Decimal> {
    let total_weight: Decimal = kept.iter().map(|c| Decimal::from(c.reliability)).sum();
    if total_weight.is_zero() {
        return None;
    }
    let weighted: Decimal = kept
        .iter()
        .map(|c| c.observation.price * Decimal::from(c.reliability))
        .sum();
    Some(weighted / total_weight)
}
