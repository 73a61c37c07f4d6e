//! Commit-reveal gate.
//!
//! A client first publishes only an opaque hash of its intent. Once that
//! commitment is ordered on-chain, a later block reveals the intent; the
//! gate recomputes the hash and accepts it only if it matches an open
//! commitment, at least `min_reveal_delay` blocks have passed, the deadline
//! has not, and the nonce is the committer's next expected value.
//!
//! A settlement may be bound to an open commitment. Each commitment guards
//! at most one settlement, and binding is only possible before the reveal.
//!
//! Commitment hash layout:
//!
//! ```text
//! SHA-256(
//!     "fairsettle:commit:v1:" || chain_id (u64 LE)
//!     || from (20) || to (20)
//!     || len(amount) (u32 LE) || amount (normalized decimal string)
//!     || deadline (u64 LE) || salt (32) || nonce (u64 LE)
//! )
//! ```

use std::collections::{HashMap, HashSet};

use fairsettle_types::{
    AccountId, BlockHeight, CommitmentHash, EventPayload, FairsettleError, Result, constants,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// The plaintext a commitment hides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementIntent {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Decimal,
    /// Last height at which a reveal is accepted.
    pub deadline: BlockHeight,
    pub salt: [u8; 32],
    pub nonce: u64,
}

/// Hash an intent under the given chain identity.
#[must_use]
pub fn commitment_hash(chain_id: u64, intent: &SettlementIntent) -> CommitmentHash {
    let amount = intent.amount.normalize().to_string();
    // Amount strings are a few dozen bytes at most.
    let amount_len = u32::try_from(amount.len()).unwrap_or(u32::MAX);

    let mut hasher = Sha256::new();
    hasher.update(constants::COMMITMENT_DOMAIN);
    hasher.update(chain_id.to_le_bytes());
    hasher.update(intent.from.as_bytes());
    hasher.update(intent.to.as_bytes());
    hasher.update(amount_len.to_le_bytes());
    hasher.update(amount.as_bytes());
    hasher.update(intent.deadline.0.to_le_bytes());
    hasher.update(intent.salt);
    hasher.update(intent.nonce.to_le_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    CommitmentHash(hash)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub committer: AccountId,
    pub hash: CommitmentHash,
    pub committed_at: BlockHeight,
    /// Set once the commitment is consumed by a successful reveal.
    pub revealed: Option<SettlementIntent>,
}

impl Commitment {
    #[must_use]
    pub fn is_revealed(&self) -> bool {
        self.revealed.is_some()
    }
}

pub struct CommitRevealGate {
    chain_id: u64,
    min_reveal_delay: u64,
    commitments: HashMap<CommitmentHash, Commitment>,
    /// Commitments already guarding a settlement. Never cleared.
    bound: HashSet<CommitmentHash>,
    nonces: HashMap<AccountId, u64>,
    pending_events: Vec<EventPayload>,
}

impl CommitRevealGate {
    #[must_use]
    pub fn new(chain_id: u64, min_reveal_delay: u64) -> Self {
        Self {
            chain_id,
            min_reveal_delay,
            commitments: HashMap::new(),
            bound: HashSet::new(),
            nonces: HashMap::new(),
            pending_events: Vec::new(),
        }
    }

    /// Record an opaque commitment at `height`.
    ///
    /// # Errors
    /// - `NullAddress` for a null committer
    /// - `AlreadyCommitted` if the hash is open, or was already consumed
    pub fn commit(
        &mut self,
        committer: AccountId,
        hash: CommitmentHash,
        height: BlockHeight,
    ) -> Result<()> {
        if committer.is_null() {
            return Err(FairsettleError::NullAddress { what: "committer" });
        }
        if self.commitments.contains_key(&hash) {
            warn!(commitment = %hash.short(), committer = %committer.short(), "duplicate commitment rejected");
            return Err(FairsettleError::AlreadyCommitted(hash));
        }
        self.commitments.insert(
            hash,
            Commitment {
                committer,
                hash,
                committed_at: height,
                revealed: None,
            },
        );
        info!(commitment = %hash.short(), committer = %committer.short(), %height, "committed");
        self.pending_events.push(EventPayload::Committed {
            committer,
            commitment: hash,
        });
        Ok(())
    }

    /// Reveal `intent` at `height` on behalf of `caller`.
    ///
    /// Checks run in order: open commitment exists, caller made it, minimum
    /// delay elapsed, deadline not passed, nonce matches. Nothing changes
    /// unless every check passes.
    pub fn reveal(
        &mut self,
        caller: AccountId,
        intent: &SettlementIntent,
        height: BlockHeight,
    ) -> Result<CommitmentHash> {
        if intent.amount <= Decimal::ZERO {
            return Err(FairsettleError::ZeroAmount { index: None });
        }
        let hash = commitment_hash(self.chain_id, intent);

        let commitment = self
            .commitments
            .get(&hash)
            .filter(|c| !c.is_revealed())
            .ok_or(FairsettleError::CommitmentNotFound(hash))?;
        if commitment.committer != caller {
            warn!(commitment = %hash.short(), caller = %caller.short(), "reveal by non-committer rejected");
            return Err(FairsettleError::CommitterMismatch(hash));
        }
        let earliest = commitment.committed_at.plus(self.min_reveal_delay);
        if height < earliest {
            warn!(commitment = %hash.short(), %height, %earliest, "reveal too early");
            return Err(FairsettleError::RevealTooEarly {
                committed_at: commitment.committed_at,
                earliest,
            });
        }
        if height > intent.deadline {
            return Err(FairsettleError::RevealExpired {
                deadline: intent.deadline,
            });
        }
        let expected = self.expected_nonce(caller);
        if intent.nonce != expected {
            warn!(committer = %caller.short(), expected, got = intent.nonce, "nonce mismatch");
            return Err(FairsettleError::InvalidNonce {
                expected,
                got: intent.nonce,
            });
        }

        if let Some(c) = self.commitments.get_mut(&hash) {
            c.revealed = Some(*intent);
        }
        self.nonces.insert(caller, expected + 1);

        info!(commitment = %hash.short(), committer = %caller.short(), nonce = expected, "revealed");
        self.pending_events.push(EventPayload::Revealed {
            committer: caller,
            commitment: hash,
            nonce: expected,
        });
        Ok(hash)
    }

    /// Check that `caller` could bind a settlement to `hash` right now.
    ///
    /// # Errors
    /// - `CommitmentNotFound` unless an unrevealed commitment exists
    /// - `CommitterMismatch` if someone else made it
    /// - `CommitmentAlreadyBound` if it already guards a settlement
    pub fn ensure_bindable(&self, caller: AccountId, hash: CommitmentHash) -> Result<()> {
        let commitment = self
            .commitments
            .get(&hash)
            .filter(|c| !c.is_revealed())
            .ok_or(FairsettleError::CommitmentNotFound(hash))?;
        if commitment.committer != caller {
            return Err(FairsettleError::CommitterMismatch(hash));
        }
        if self.bound.contains(&hash) {
            warn!(commitment = %hash.short(), "commitment reuse rejected");
            return Err(FairsettleError::CommitmentAlreadyBound(hash));
        }
        Ok(())
    }

    /// Reserve `hash` for one settlement.
    pub fn bind(&mut self, caller: AccountId, hash: CommitmentHash) -> Result<()> {
        self.ensure_bindable(caller, hash)?;
        self.bound.insert(hash);
        debug!(commitment = %hash.short(), "commitment bound");
        Ok(())
    }

    #[must_use]
    pub fn is_bound(&self, hash: &CommitmentHash) -> bool {
        self.bound.contains(hash)
    }

    /// The intent `hash` was revealed with, if it has been.
    #[must_use]
    pub fn revealed_intent(&self, hash: &CommitmentHash) -> Option<&SettlementIntent> {
        self.commitments.get(hash).and_then(|c| c.revealed.as_ref())
    }

    /// Next nonce `committer` must reveal with. Starts at 0.
    #[must_use]
    pub fn expected_nonce(&self, committer: AccountId) -> u64 {
        self.nonces.get(&committer).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn commitment(&self, hash: &CommitmentHash) -> Option<&Commitment> {
        self.commitments.get(hash)
    }

    #[must_use]
    pub fn is_revealed(&self, hash: &CommitmentHash) -> bool {
        self.commitments
            .get(hash)
            .is_some_and(Commitment::is_revealed)
    }

    #[must_use]
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn take_events(&mut self) -> Vec<EventPayload> {
        std::mem::take(&mut self.pending_events)
    }
}
