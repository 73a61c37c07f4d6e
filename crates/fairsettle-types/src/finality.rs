//! Staged finality types.
//!
//! A settlement's finality phase only ever moves forward:
//! **TENTATIVE → SEMI_FINAL → FINAL**. The one exception is an explicit
//! admin reorg recovery, which restarts bookkeeping at TENTATIVE.

use serde::{Deserialize, Serialize};

use crate::{BlockFingerprint, BlockHeight, SettlementId};

/// Finality phase. Ordered so that `max` keeps the phase monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum FinalityPhase {
    Tentative,
    SemiFinal,
    /// Treated as irreversible.
    Final,
}

impl std::fmt::Display for FinalityPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tentative => write!(f, "TENTATIVE"),
            Self::SemiFinal => write!(f, "SEMI_FINAL"),
            Self::Final => write!(f, "FINAL"),
        }
    }
}

/// Per-settlement finality bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityRecord {
    pub settlement_id: SettlementId,
    pub phase: FinalityPhase,
    /// Height at which the settlement finished executing.
    pub executed_at: BlockHeight,
    pub confirmations: u64,
    /// 0..=100.
    pub confidence: u8,
    /// Chain state observed at execution.
    pub fingerprint: BlockFingerprint,
    pub reorg_detected: bool,
}

/// Validator quorum snapshot for one settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumStatus {
    pub votes: usize,
    pub required_votes: usize,
    pub total_validators: usize,
}

impl QuorumStatus {
    #[must_use]
    pub fn reached(&self) -> bool {
        self.total_validators > 0 && self.votes >= self.required_votes
    }
}
