//! Bounded ring buffer of reliable aggregate medians and the TWAP over it.
//!
//! ```text
//! TWAP = Σ(price_i × (t_{i+1} − t_i)) / Σ(t_{i+1} − t_i)
//! ```
//!
//! where the last sample's interval runs up to the query time. Only samples
//! taken at or after the window cutoff count: the price in effect at the
//! cutoff is not carried forward, so the stretch between the cutoff and the
//! first in-window sample carries no weight. If every sample in the window
//! shares one timestamp the TWAP falls back to their arithmetic mean.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Fixed-capacity history of `(timestamp, median)` samples.
#[derive(Debug, Clone)]
pub struct PriceHistory {
    samples: VecDeque<(DateTime<Utc>, Decimal)>,
    capacity: usize,
}

impl PriceHistory {
    /// # Panics
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "PriceHistory capacity must be > 0");
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest at capacity.
    pub fn push(&mut self, at: DateTime<Utc>, price: Decimal) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((at, price));
    }

    /// Time-weighted average over samples no older than `window_secs` before `now`.
    #[must_use]
    pub fn twap(&self, now: DateTime<Utc>, window_secs: u64) -> Option<Decimal> {
        let window = chrono::Duration::seconds(i64::try_from(window_secs).unwrap_or(i64::MAX));
        let cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let in_window: Vec<(DateTime<Utc>, Decimal)> = self
            .samples
            .iter()
            .filter(|(ts, _)| *ts >= cutoff && *ts <= now)
            .copied()
            .collect();

        if in_window.is_empty() {
            return None;
        }

        let mut weighted_sum = Decimal::ZERO;
        let mut total_secs = Decimal::ZERO;
        for (i, (ts, price)) in in_window.iter().enumerate() {
            let end = in_window.get(i + 1).map_or(now, |(next, _)| *next);
            let secs = Decimal::from((end - *ts).num_seconds().max(0));
            weighted_sum += *price * secs;
            total_secs += secs;
        }

        if total_secs > Decimal::ZERO {
            Some(weighted_sum / total_secs)
        } else {
            let sum: Decimal = in_window.iter().map(|(_, p)| *p).sum();
            Some(sum / Decimal::from(in_window.len()))
        }
    }

    #[must_use]
    pub fn latest(&self) -> Option<(DateTime<Utc>, Decimal)> {
        self.samples.back().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
