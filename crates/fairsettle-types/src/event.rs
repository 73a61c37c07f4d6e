//! Every successful surface operation produces an event. Events form the
//! audit trail that front-end tooling polls; the `EventPayload` enum lists
//! every kind.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    AccountId, BlockFingerprint, BlockHeight, BreakerLevel, CommitmentHash, DisputeOutcome,
    FinalityPhase, SettlementId, SettlementState, SourceClass, SourceId,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number, starting at 1.
    pub seq: u64,
    pub height: BlockHeight,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    // Settlement lifecycle
    SettlementCreated {
        id: SettlementId,
        initiator: AccountId,
        transfers: usize,
        total_required: Decimal,
        queue_position: u64,
    },
    Deposited {
        id: SettlementId,
        depositor: AccountId,
        amount: Decimal,
        total_deposited: Decimal,
    },
    SettlementInitiated {
        id: SettlementId,
        price: Decimal,
        confidence: u8,
    },
    TransfersExecuted {
        id: SettlementId,
        executed_now: usize,
        executed_total: usize,
        amount_paid: Decimal,
    },
    SettlementFinalized {
        id: SettlementId,
    },
    SettlementDisputed {
        id: SettlementId,
        disputant: AccountId,
        reason: String,
    },
    DisputeResolved {
        id: SettlementId,
        outcome: DisputeOutcome,
    },
    SettlementRefunded {
        id: SettlementId,
        from_state: SettlementState,
        amount: Decimal,
    },

    // Commit-reveal
    Committed {
        committer: AccountId,
        commitment: CommitmentHash,
    },
    Revealed {
        committer: AccountId,
        commitment: CommitmentHash,
        nonce: u64,
    },

    // Oracle
    SourceConfigured {
        source_id: SourceId,
        class: SourceClass,
        identity: AccountId,
    },
    SourceToggled {
        source_id: SourceId,
        active: bool,
    },
    SourceAutoDisabled {
        source_id: SourceId,
        consecutive_failures: u32,
    },
    CircuitBreakerChanged {
        from: BreakerLevel,
        to: BreakerLevel,
    },

    // Admin
    Paused {
        by: AccountId,
    },
    Unpaused {
        by: AccountId,
    },
    AdminTransferred {
        from: AccountId,
        to: AccountId,
    },

    // Finality
    ValidatorRegistered {
        validator: AccountId,
    },
    ValidatorRemoved {
        validator: AccountId,
    },
    ValidatorVoted {
        id: SettlementId,
        validator: AccountId,
        votes: usize,
    },
    FinalityAdvanced {
        id: SettlementId,
        from: Option<FinalityPhase>,
        to: FinalityPhase,
        confidence: u8,
    },
    ReorgDetected {
        id: SettlementId,
        recorded: BlockFingerprint,
        observed: BlockFingerprint,
        estimated_depth: u64,
    },
    ReorgRecovered {
        id: SettlementId,
    },
}

/// Bounded, append-only event log.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: Vec<Event>,
    next_seq: u64,
    max_retained: usize,
}

impl EventLog {
    #[must_use]
    pub fn new(max_retained: usize) -> Self {
        Self {
            events: Vec::new(),
            next_seq: 1,
            max_retained: max_retained.max(1),
        }
    }

    /// Append an event at `height`, draining the oldest past the retention bound.
    pub fn emit(&mut self, height: BlockHeight, payload: EventPayload) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(Event {
            seq,
            height,
            payload,
        });
        if self.events.len() > self.max_retained {
            let drain_count = self.events.len() - self.max_retained;
            self.events.drain(0..drain_count);
        }
        seq
    }

    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    #[must_use]
    pub fn recent(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    #[must_use]
    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(crate::constants::MAX_RETAINED_EVENTS)
    }
}
