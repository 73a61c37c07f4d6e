//! Payout idempotency guard.
//!
//! Each `(settlement, transfer index)` pair can be paid exactly once. The
//! executed flag on [`Transfer`](fairsettle_types::Transfer) is the primary
//! guard; this set is a second, independent record consulted before any
//! payout is credited. Entries are never evicted: forgetting a paid
//! transfer would reopen it to double payment.

use std::collections::HashSet;

use fairsettle_types::{FairsettleError, Result, SettlementId};

#[derive(Debug, Clone, Default)]
pub struct PayoutGuard {
    paid: HashSet<(SettlementId, usize)>,
}

impl PayoutGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail if any of `indices` was already paid for `id`.
    pub fn ensure_unpaid(&self, id: SettlementId, indices: &[usize]) -> Result<()> {
        match indices.iter().find(|i| self.is_paid(id, **i)) {
            Some(index) => Err(double_payment(id, *index)),
            None => Ok(()),
        }
    }

    /// Record a payout. Returns `false` if it was already recorded; callers
    /// run [`ensure_unpaid`](Self::ensure_unpaid) first.
    pub fn mark_paid(&mut self, id: SettlementId, index: usize) -> bool {
        self.paid.insert((id, index))
    }

    #[must_use]
    pub fn is_paid(&self, id: SettlementId, index: usize) -> bool {
        self.paid.contains(&(id, index))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paid.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paid.is_empty()
    }
}

fn double_payment(id: SettlementId, index: usize) -> FairsettleError {
    tracing::error!(settlement = %id, index, "double payout blocked");
    FairsettleError::ConservationViolation {
        reason: format!("transfer {index} of {id} already paid"),
    }
}
