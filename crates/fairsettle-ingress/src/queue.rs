//! FIFO settlement queue.
//!
//! Positions are assigned from a monotonically increasing tail counter and
//! never reused. The head is the smallest live position, so advancing the
//! head is a single `pop_first` on the ordered map.

use std::collections::BTreeMap;

use fairsettle_types::{FairsettleError, Result, SettlementId};

/// Arrival-ordered queue of PENDING settlements.
#[derive(Debug, Clone, Default)]
pub struct SettlementQueue {
    /// position → settlement, ascending.
    entries: BTreeMap<u64, SettlementId>,
    /// Position the next arrival will receive.
    tail: u64,
}

impl SettlementQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail and return the assigned position.
    pub fn enqueue(&mut self, id: SettlementId) -> u64 {
        let position = self.tail;
        self.tail += 1;
        self.entries.insert(position, id);
        position
    }

    /// The settlement currently allowed to leave PENDING.
    #[must_use]
    pub fn head(&self) -> Option<SettlementId> {
        self.entries.first_key_value().map(|(_, id)| *id)
    }

    #[must_use]
    pub fn is_head(&self, id: SettlementId) -> bool {
        self.head() == Some(id)
    }

    /// Fail with `NotQueueHead` unless `id` is at the head.
    pub fn ensure_head(&self, id: SettlementId) -> Result<()> {
        if self.is_head(id) {
            Ok(())
        } else {
            Err(FairsettleError::NotQueueHead {
                id,
                head: self.head(),
            })
        }
    }

    /// Advance the head past `id`.
    ///
    /// # Errors
    /// `NotQueueHead` if `id` is not at the head; the queue is unchanged.
    pub fn pop_head(&mut self, id: SettlementId) -> Result<u64> {
        self.ensure_head(id)?;
        let (position, _) = self
            .entries
            .pop_first()
            .ok_or_else(|| FairsettleError::Internal("queue head vanished".into()))?;
        Ok(position)
    }

    /// Remove the entry at `position` regardless of where it sits.
    ///
    /// Only used when a PENDING settlement is abandoned by timeout.
    pub fn remove(&mut self, position: u64) -> Option<SettlementId> {
        self.entries.remove(&position)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
