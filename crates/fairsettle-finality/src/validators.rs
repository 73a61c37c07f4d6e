//! Validator registry and signed votes.
//!
//! A vote is an ed25519 signature over
//! `"fairsettle:vote:v1:" || chain_id || settlement_id || fingerprint`,
//! where the fingerprint is the block recorded at execution. Binding the
//! fingerprint means a vote cast before a reorg does not carry over to the
//! recovered record.

use std::collections::{BTreeMap, BTreeSet};

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use fairsettle_types::{
    AccountId, BlockFingerprint, FairsettleError, QuorumStatus, Result, SettlementId, constants,
};

/// `⌈2n/3⌉ + 1`.
///
/// Sets of fewer than three validators need more votes than they have
/// members, so they never reach quorum.
#[must_use]
pub fn required_votes(total: usize) -> usize {
    total.saturating_mul(2).div_ceil(3).saturating_add(1)
}

/// Canonical bytes a validator signs to vote for `id`.
#[must_use]
pub fn vote_message(chain_id: u64, id: SettlementId, fingerprint: &BlockFingerprint) -> Vec<u8> {
    let mut msg = Vec::with_capacity(constants::VOTE_DOMAIN.len() + 8 + 8 + 32);
    msg.extend_from_slice(constants::VOTE_DOMAIN);
    msg.extend_from_slice(&chain_id.to_le_bytes());
    msg.extend_from_slice(&id.0.to_le_bytes());
    msg.extend_from_slice(&fingerprint.0);
    msg
}

#[derive(Debug, Clone, Default)]
pub struct ValidatorSet {
    keys: BTreeMap<AccountId, VerifyingKey>,
    /// Voters per settlement. May include since-removed validators.
    votes: BTreeMap<SettlementId, BTreeSet<AccountId>>,
}

impl ValidatorSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `validator` with its verifying key.
    ///
    /// Returns `false` if it was already registered; the key is replaced
    /// (rotation) either way.
    pub fn register(&mut self, validator: AccountId, key: VerifyingKey) -> Result<bool> {
        if validator.is_null() {
            return Err(FairsettleError::NullAddress { what: "validator" });
        }
        Ok(self.keys.insert(validator, key).is_none())
    }

    pub fn remove(&mut self, validator: AccountId) -> Result<()> {
        self.keys
            .remove(&validator)
            .map(|_| ())
            .ok_or(FairsettleError::NotValidator(validator))
    }

    #[must_use]
    pub fn contains(&self, validator: &AccountId) -> bool {
        self.keys.contains_key(validator)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Verify and record one vote. Returns `(counted_votes, newly_recorded)`.
    ///
    /// # Errors
    /// `NotValidator` for an unregistered caller, `InvalidVoteSignature` if
    /// the signature does not verify against `message`.
    pub fn submit_vote(
        &mut self,
        validator: AccountId,
        id: SettlementId,
        message: &[u8],
        signature: &Signature,
    ) -> Result<(usize, bool)> {
        let key = self
            .keys
            .get(&validator)
            .ok_or(FairsettleError::NotValidator(validator))?;
        key.verify(message, signature)
            .map_err(|_| FairsettleError::InvalidVoteSignature(validator))?;
        let fresh = self.votes.entry(id).or_default().insert(validator);
        Ok((self.votes_for(id), fresh))
    }

    /// Votes for `id` from currently registered validators.
    #[must_use]
    pub fn votes_for(&self, id: SettlementId) -> usize {
        self.votes
            .get(&id)
            .map_or(0, |voters| voters.iter().filter(|v| self.keys.contains_key(v)).count())
    }

    /// Forget every vote cast for `id`.
    pub fn clear_votes(&mut self, id: SettlementId) {
        self.votes.remove(&id);
    }

    #[must_use]
    pub fn quorum_status(&self, id: SettlementId) -> QuorumStatus {
        let total = self.len();
        QuorumStatus {
            votes: self.votes_for(id),
            required_votes: required_votes(total),
            total_validators: total,
        }
    }
}
