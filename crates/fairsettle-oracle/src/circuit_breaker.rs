//! Graduated circuit breaker over aggregate-to-aggregate price movement.
//!
//! Levels escalate on abnormal rounds and relax one step after a run of
//! healthy rounds. EMERGENCY is sticky: only [`CircuitBreaker::reset`]
//! clears it.

use fairsettle_types::BreakerLevel;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Severity tracker fed once per aggregation round.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    level: BreakerLevel,
    /// Median of the last reliable round, the deviation reference.
    reference: Option<Decimal>,
    healthy_streak: u32,
    deviation_ratio: Decimal,
    cooldown: u32,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(deviation_ratio: Decimal, cooldown: u32) -> Self {
        Self {
            level: BreakerLevel::Normal,
            reference: None,
            healthy_streak: 0,
            deviation_ratio,
            cooldown,
        }
    }

    #[must_use]
    pub fn level(&self) -> BreakerLevel {
        self.level
    }

    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.level == BreakerLevel::Emergency
    }

    /// The round had fewer valid sources than the BFT minimum.
    pub fn record_insufficient(&mut self) -> Option<(BreakerLevel, BreakerLevel)> {
        self.healthy_streak = 0;
        self.transition(self.level.escalated(1))
    }

    /// The round produced `median` from enough sources.
    ///
    /// A move above the deviation ratio escalates one level per multiple of
    /// the ratio (at most four). Otherwise the round counts toward cooldown.
    pub fn record_median(&mut self, median: Decimal) -> Option<(BreakerLevel, BreakerLevel)> {
        let steps = self.deviation_steps(median);
        self.reference = Some(median);

        if steps > 0 {
            self.healthy_streak = 0;
            return self.transition(self.level.escalated(steps));
        }

        if self.level == BreakerLevel::Normal || self.is_tripped() {
            return None;
        }
        self.healthy_streak = self.healthy_streak.saturating_add(1);
        if self.healthy_streak >= self.cooldown {
            self.healthy_streak = 0;
            return self.transition(self.level.relaxed());
        }
        None
    }

    /// Admin reset to NORMAL. Forgets the deviation reference so the next
    /// round is not compared against pre-incident prices.
    pub fn reset(&mut self) -> Option<(BreakerLevel, BreakerLevel)> {
        self.reference = None;
        self.healthy_streak = 0;
        self.transition(BreakerLevel::Normal)
    }

    fn deviation_steps(&self, median: Decimal) -> u8 {
        let Some(reference) = self.reference else {
            return 0;
        };
        if reference <= Decimal::ZERO || self.deviation_ratio <= Decimal::ZERO {
            return 0;
        }
        let deviation = (median - reference).abs() / reference;
        if deviation <= self.deviation_ratio {
            return 0;
        }
        let multiples = (deviation / self.deviation_ratio).floor();
        multiples.to_u8().unwrap_or(u8::MAX).clamp(1, 4)
    }

    fn transition(&mut self, to: BreakerLevel) -> Option<(BreakerLevel, BreakerLevel)> {
        let from = self.level;
        if from == to {
            return None;
        }
        self.level = to;
        if to > from {
            tracing::warn!(%from, %to, "circuit breaker escalated");
        } else {
            tracing::info!(%from, %to, "circuit breaker relaxed");
        }
        Some((from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        // 5% deviation, cooldown after 3 healthy rounds
        CircuitBreaker::new(Decimal::new(5, 2), 3)
    }

    #[test]
    fn first_round_only_sets_reference() {
        let mut cb = breaker();
        assert!(cb.record_median(Decimal::from(2000)).is_none());
        assert_eq!(cb.level(), BreakerLevel::Normal);
    }

    #[test]
    fn small_moves_do_not_escalate() {
        let mut cb = breaker();
        cb.record_median(Decimal::from(2000));
        assert!(cb.record_median(Decimal::from(2090)).is_none());
        assert_eq!(cb.level(), BreakerLevel::Normal);
    }

    #[test]
    fn deviation_escalates_by_multiples() {
        let mut cb = breaker();
        cb.record_median(Decimal::from(1000));
        // 12% move = 2 multiples of 5%
        assert_eq!(
            cb.record_median(Decimal::from(1120)),
            Some((BreakerLevel::Normal, BreakerLevel::High))
        );
    }

    #[test]
    fn crash_trips_emergency_and_stays() {
        let mut cb = breaker();
        cb.record_median(Decimal::from(1000));
        cb.record_median(Decimal::from(500));
        assert!(cb.is_tripped());
        for _ in 0..10 {
            cb.record_median(Decimal::from(500));
        }
        assert!(cb.is_tripped());
        assert_eq!(
            cb.reset(),
            Some((BreakerLevel::Emergency, BreakerLevel::Normal))
        );
        assert!(!cb.is_tripped());
    }

    #[test]
    fn insufficient_rounds_escalate() {
        let mut cb = breaker();
        cb.record_insufficient();
        cb.record_insufficient();
        assert_eq!(cb.level(), BreakerLevel::High);
    }

    #[test]
    fn cooldown_relaxes_one_step() {
        let mut cb = breaker();
        cb.record_insufficient();
        cb.record_median(Decimal::from(100));
        cb.record_median(Decimal::from(100));
        assert_eq!(cb.level(), BreakerLevel::Elevated);
        assert_eq!(
            cb.record_median(Decimal::from(100)),
            Some((BreakerLevel::Elevated, BreakerLevel::Normal))
        );
    }

    #[test]
    fn reset_forgets_reference() {
        let mut cb = breaker();
        cb.record_median(Decimal::from(1000));
        cb.record_median(Decimal::from(100));
        cb.reset();
        assert!(cb.record_median(Decimal::from(100)).is_none());
        assert_eq!(cb.level(), BreakerLevel::Normal);
    }
}
