//! Staged finality over a [`SettlementEngine`].
//!
//! ```text
//! confirmations:  0 ─────────── semi_final ─────────── final
//! phase:          TENTATIVE     SEMI_FINAL             FINAL
//! confidence:     30 ───► 69    70 ───────► 99         100
//! ```
//!
//! A record is opened for every FINALIZED settlement, keyed to the height
//! and block fingerprint the engine stored when the last transfer was paid. Phases are derived from confirmations since
//! that block and stored as `max(stored, derived)`, so they never regress.
//! Records with a detected reorg stop advancing until an admin recovers them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, VerifyingKey};
use fairsettle_oracle::PriceSource;
use fairsettle_settlement::{ExecutionProgress, SettlementEngine};
use fairsettle_types::{
    AccountId, BlockFingerprint, BlockHeight, EventPayload, FairsettleError, FinalityParams,
    FinalityPhase, FinalityRecord, QuorumStatus, Result, SettlementId, constants,
};
use tracing::{debug, info, warn};

use crate::validators::{ValidatorSet, vote_message};

/// Phase reached after `confirmations` blocks.
#[must_use]
pub fn phase_for(confirmations: u64, params: &FinalityParams) -> FinalityPhase {
    if confirmations >= params.final_confirmations {
        FinalityPhase::Final
    } else if confirmations >= params.semi_final_confirmations {
        FinalityPhase::SemiFinal
    } else {
        FinalityPhase::Tentative
    }
}

/// Confidence within `phase`, interpolated linearly over its confirmation band.
#[must_use]
pub fn confidence_for(phase: FinalityPhase, confirmations: u64, params: &FinalityParams) -> u8 {
    let (floor, ceiling, start, end) = match phase {
        FinalityPhase::Final => return constants::FINAL_CONFIDENCE,
        FinalityPhase::Tentative => (
            constants::TENTATIVE_CONFIDENCE,
            constants::SEMI_FINAL_CONFIDENCE - 1,
            0,
            params.semi_final_confirmations,
        ),
        FinalityPhase::SemiFinal => (
            constants::SEMI_FINAL_CONFIDENCE,
            constants::FINAL_CONFIDENCE - 1,
            params.semi_final_confirmations,
            params.final_confirmations,
        ),
    };
    let span = end.saturating_sub(start).max(1);
    let into = confirmations.saturating_sub(start).min(span);
    let gained = u64::from(ceiling - floor + 1) * into / span;
    u8::try_from(u64::from(floor) + gained).map_or(ceiling, |c| c.min(ceiling))
}

/// Wraps the settlement engine with finality, reorg and quorum bookkeeping.
///
/// Settlements finalized directly through [`engine_mut`](Self::engine_mut)
/// are picked up by the next [`sweep`](Self::sweep).
pub struct FinalityController<S> {
    engine: SettlementEngine<S>,
    records: BTreeMap<SettlementId, FinalityRecord>,
    validators: ValidatorSet,
}

impl<S: PriceSource> FinalityController<S> {
    #[must_use]
    pub fn new(engine: SettlementEngine<S>) -> Self {
        Self {
            engine,
            records: BTreeMap::new(),
            validators: ValidatorSet::new(),
        }
    }

    #[must_use]
    pub fn engine(&self) -> &SettlementEngine<S> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SettlementEngine<S> {
        &mut self.engine
    }

    fn params(&self) -> &FinalityParams {
        &self.engine.config().finality
    }

    // =================================================================
    // Execution and block sweep
    // =================================================================

    /// Execute through the engine and open a TENTATIVE record once the
    /// settlement reaches FINALIZED.
    pub fn execute_settlement(
        &mut self,
        id: SettlementId,
        max_transfers: usize,
    ) -> Result<ExecutionProgress> {
        let progress = self.engine.execute_settlement(id, max_transfers)?;
        if progress.is_complete() {
            self.track_finalized();
        }
        Ok(progress)
    }

    /// Open a TENTATIVE record for every FINALIZED settlement that has none.
    /// Returns how many were opened.
    pub fn track_finalized(&mut self) -> usize {
        let opened: Vec<FinalityRecord> = self
            .engine
            .settlements()
            .filter(|s| !self.records.contains_key(&s.id))
            .filter_map(|s| {
                s.finalized_at.map(|(height, fingerprint)| FinalityRecord {
                    settlement_id: s.id,
                    phase: FinalityPhase::Tentative,
                    executed_at: height,
                    confirmations: 0,
                    confidence: constants::TENTATIVE_CONFIDENCE,
                    fingerprint,
                    reorg_detected: false,
                })
            })
            .collect();
        for record in &opened {
            let id = record.settlement_id;
            self.records.insert(id, *record);
            info!(settlement = %id, height = %record.executed_at, fingerprint = %record.fingerprint, "finality tracking opened");
            self.engine.record_event(EventPayload::FinalityAdvanced {
                id,
                from: None,
                to: FinalityPhase::Tentative,
                confidence: record.confidence,
            });
        }
        opened.len()
    }

    /// Observe a block on the engine, then advance every open record.
    pub fn observe_block(
        &mut self,
        height: BlockHeight,
        timestamp: DateTime<Utc>,
        block_hash: [u8; 32],
    ) -> Result<()> {
        self.engine.observe_block(height, timestamp, block_hash)?;
        self.sweep();
        Ok(())
    }

    /// Open records for newly finalized settlements, then persist derived
    /// progress for every non-final, non-reorged record. Returns how many
    /// records changed phase.
    pub fn sweep(&mut self) -> usize {
        self.track_finalized();
        let height = self.engine.height();
        let params = self.params().clone();
        let mut advanced = Vec::new();
        for record in self.records.values_mut() {
            if record.phase == FinalityPhase::Final || record.reorg_detected {
                continue;
            }
            let from = record.phase;
            *record = derive(record, height, &params);
            if record.phase != from {
                advanced.push((record.settlement_id, from, record.phase, record.confidence));
            }
        }
        debug!(%height, advanced = advanced.len(), "finality sweep");
        let count = advanced.len();
        for (id, from, to, confidence) in advanced {
            info!(settlement = %id, %from, %to, confidence, "finality advanced");
            self.engine.record_event(EventPayload::FinalityAdvanced {
                id,
                from: Some(from),
                to,
                confidence,
            });
        }
        count
    }

    // =================================================================
    // Finality queries
    // =================================================================

    /// Finality record as of the current height.
    pub fn get_settlement_finality(&self, id: SettlementId) -> Result<FinalityRecord> {
        let record = self.record(id)?;
        if record.reorg_detected {
            return Ok(*record);
        }
        Ok(derive(record, self.engine.height(), self.params()))
    }

    /// Whether a reorg of `depth` blocks would leave the execution block in
    /// place: true at depth 0, false beyond `max_reorg_depth`, otherwise
    /// confirmations must exceed `depth`.
    pub fn is_reorg_safe_at_depth(&self, id: SettlementId, depth: u64) -> Result<bool> {
        let record = self.get_settlement_finality(id)?;
        if depth == 0 {
            return Ok(true);
        }
        if depth > self.params().max_reorg_depth || record.reorg_detected {
            return Ok(false);
        }
        Ok(record.confirmations > depth)
    }

    /// Compare the fingerprint recorded at execution against `observed`.
    ///
    /// A mismatch flags the record (freezing its phase) and is reported as
    /// `ReorgDetected`. The flag is the only state the failing call leaves
    /// behind.
    pub fn check_for_reorg(&mut self, id: SettlementId, observed: BlockFingerprint) -> Result<()> {
        let height = self.engine.height();
        let record = self
            .records
            .get_mut(&id)
            .ok_or(FairsettleError::NoFinalityRecord(id))?;
        if record.fingerprint == observed {
            return Ok(());
        }
        let estimated_depth = height.confirmations_since(record.executed_at) + 1;
        let recorded = record.fingerprint;
        let first = !record.reorg_detected;
        record.reorg_detected = true;

        warn!(
            settlement = %id,
            %recorded,
            %observed,
            estimated_depth,
            "reorg detected"
        );
        if first {
            self.engine.record_event(EventPayload::ReorgDetected {
                id,
                recorded,
                observed,
                estimated_depth,
            });
        }
        Err(FairsettleError::ReorgDetected { id, estimated_depth })
    }

    /// Admin: restart finality bookkeeping for `id` at the current block.
    ///
    /// Settlement state is untouched. Votes cast over the old fingerprint
    /// are discarded.
    pub fn recover_from_reorg(&mut self, caller: AccountId, id: SettlementId) -> Result<()> {
        self.engine.ensure_admin(caller)?;
        let chain = *self.engine.chain();
        let record = self
            .records
            .get_mut(&id)
            .ok_or(FairsettleError::NoFinalityRecord(id))?;
        *record = FinalityRecord {
            settlement_id: id,
            phase: FinalityPhase::Tentative,
            executed_at: chain.height,
            confirmations: 0,
            confidence: constants::TENTATIVE_CONFIDENCE,
            fingerprint: chain.fingerprint(),
            reorg_detected: false,
        };
        self.validators.clear_votes(id);
        info!(settlement = %id, height = %chain.height, "finality reset after reorg");
        self.engine.record_event(EventPayload::ReorgRecovered { id });
        Ok(())
    }

    fn record(&self, id: SettlementId) -> Result<&FinalityRecord> {
        self.records
            .get(&id)
            .ok_or(FairsettleError::NoFinalityRecord(id))
    }

    // =================================================================
    // Validators
    // =================================================================

    pub fn register_validator(
        &mut self,
        caller: AccountId,
        validator: AccountId,
        key: VerifyingKey,
    ) -> Result<()> {
        self.engine.ensure_admin(caller)?;
        if self.validators.register(validator, key)? {
            info!(validator = %validator.short(), total = self.validators.len(), "validator registered");
            self.engine
                .record_event(EventPayload::ValidatorRegistered { validator });
        } else {
            info!(validator = %validator.short(), "validator key rotated");
        }
        Ok(())
    }

    pub fn remove_validator(&mut self, caller: AccountId, validator: AccountId) -> Result<()> {
        self.engine.ensure_admin(caller)?;
        self.validators.remove(validator)?;
        info!(validator = %validator.short(), total = self.validators.len(), "validator removed");
        self.engine
            .record_event(EventPayload::ValidatorRemoved { validator });
        Ok(())
    }

    /// Bytes a validator signs to vote for `id`'s execution.
    pub fn vote_payload(&self, id: SettlementId) -> Result<Vec<u8>> {
        let record = self.record(id)?;
        Ok(vote_message(
            self.engine.config().chain_id,
            id,
            &record.fingerprint,
        ))
    }

    /// Record `validator`'s signed vote for `id`. Returns the counted votes.
    pub fn submit_vote(
        &mut self,
        validator: AccountId,
        id: SettlementId,
        signature: &Signature,
    ) -> Result<usize> {
        let message = self.vote_payload(id)?;
        let (votes, fresh) = self
            .validators
            .submit_vote(validator, id, &message, signature)
            .inspect_err(|e| {
                warn!(settlement = %id, validator = %validator.short(), error = %e, "vote rejected");
            })?;
        if fresh {
            debug!(settlement = %id, validator = %validator.short(), votes, "vote recorded");
            self.engine.record_event(EventPayload::ValidatorVoted {
                id,
                validator,
                votes,
            });
        }
        Ok(votes)
    }

    #[must_use]
    pub fn get_quorum_status(&self, id: SettlementId) -> QuorumStatus {
        self.validators.quorum_status(id)
    }

    #[must_use]
    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }
}

fn derive(record: &FinalityRecord, height: BlockHeight, params: &FinalityParams) -> FinalityRecord {
    let confirmations = height.confirmations_since(record.executed_at);
    let phase = record.phase.max(phase_for(confirmations, params));
    let confidence = confidence_for(phase, confirmations, params).max(record.confidence);
    FinalityRecord {
        confirmations,
        phase,
        confidence,
        ..*record
    }
}
