//! Settlement engine: the single owner of settlement records.
//!
//! ```text
//! PENDING ──► INITIATED ──► EXECUTING ──► FINALIZED
//!    │            │    ▲
//!    │            ▼    │ dismissed
//!    │         DISPUTED
//!    │            │ upheld + refund
//!    ▼            ▼
//!  FAILED ◄───────┘        (PENDING → FAILED on timeout refund)
//! ```
//!
//! Every operation validates fully before mutating: new totals, ledger
//! balances and conservation counters are computed with checked arithmetic
//! up front, and nothing is written unless all of them fit. State changes
//! go through one table-checked transition. Mutations to the settlement
//! table happen before any credit to the outward [`Ledger`], so a payout
//! never observes a settlement in its pre-payment state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fairsettle_ingress::{CommitRevealGate, SettlementIntent, SettlementQueue};
use fairsettle_oracle::{FeedSelector, OracleAggregator, PriceSource};
use fairsettle_types::{
    AccountId, AggregatedPrice, BlockHeight, BreakerLevel, ChainView, CommitmentHash, Dispute,
    DisputeOutcome, EventLog, EventPayload, FairsettleError, ProtocolConfig, Result, Settlement,
    SettlementId, SettlementState, SourceClass, SourceId, Transfer, TransferRequest,
};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::access::AccessControl;
use crate::conservation::ValueConservation;
use crate::idempotency::PayoutGuard;
use crate::ledger::Ledger;

/// Outcome of one `execute_settlement` call.
///
/// A partial batch is not an error: call again to continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionProgress {
    pub id: SettlementId,
    pub executed_now: usize,
    pub executed_total: usize,
    pub transfer_count: usize,
    pub amount_paid: Decimal,
    pub state: SettlementState,
}

impl ExecutionProgress {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == SettlementState::Finalized
    }
}

pub struct SettlementEngine<S> {
    config: ProtocolConfig,
    chain: ChainView,
    settlements: BTreeMap<SettlementId, Settlement>,
    next_id: SettlementId,
    queue: SettlementQueue,
    oracle: OracleAggregator<S>,
    gate: CommitRevealGate,
    ledger: Ledger,
    payouts: PayoutGuard,
    conservation: ValueConservation,
    access: AccessControl,
    events: EventLog,
}

impl<S: PriceSource> SettlementEngine<S> {
    /// Build an engine at genesis height 0.
    ///
    /// # Errors
    /// `Configuration` for an invalid config, `NullAddress` for a null admin.
    pub fn new(
        config: ProtocolConfig,
        admin: AccountId,
        feed: S,
        genesis_time: DateTime<Utc>,
    ) -> Result<Self> {
        config.validate()?;
        let access = AccessControl::new(admin)?;
        info!(chain_id = config.chain_id, admin = %admin.short(), "settlement engine started");
        Ok(Self {
            chain: ChainView::genesis(config.chain_id, genesis_time),
            settlements: BTreeMap::new(),
            next_id: SettlementId(1),
            queue: SettlementQueue::new(),
            oracle: OracleAggregator::new(config.oracle.clone(), feed),
            gate: CommitRevealGate::new(
                config.chain_id,
                config.commit_reveal.min_reveal_delay_blocks,
            ),
            ledger: Ledger::new(),
            payouts: PayoutGuard::new(),
            conservation: ValueConservation::new(),
            access,
            events: EventLog::new(config.settlement.max_retained_events),
            config,
        })
    }

    // =================================================================
    // Host chain
    // =================================================================

    /// Advance the engine's view of the host chain.
    pub fn observe_block(
        &mut self,
        height: BlockHeight,
        timestamp: DateTime<Utc>,
        block_hash: [u8; 32],
    ) -> Result<()> {
        self.chain.observe(height, timestamp, block_hash)?;
        debug!(%height, fingerprint = %self.chain.fingerprint(), "block observed");
        Ok(())
    }

    #[must_use]
    pub fn chain(&self) -> &ChainView {
        &self.chain
    }

    #[must_use]
    pub fn height(&self) -> BlockHeight {
        self.chain.height
    }

    // =================================================================
    // Settlement surface
    // =================================================================

    /// Create a PENDING settlement and append it to the FIFO queue.
    pub fn create_settlement(
        &mut self,
        caller: AccountId,
        transfers: Vec<TransferRequest>,
        timeout_blocks: u64,
    ) -> Result<SettlementId> {
        self.create(caller, transfers, timeout_blocks, None)
    }

    /// Create a one-transfer settlement bound to `commitment`.
    ///
    /// The commitment must be open (not yet revealed), made by `caller`,
    /// and not guard any other settlement. Execution will require it to be
    /// revealed with an intent paying exactly this transfer.
    pub fn create_settlement_with_commitment(
        &mut self,
        caller: AccountId,
        transfers: Vec<TransferRequest>,
        timeout_blocks: u64,
        commitment: CommitmentHash,
    ) -> Result<SettlementId> {
        if transfers.len() != 1 {
            return Err(FairsettleError::InvalidArgument {
                reason: format!(
                    "a commitment-bound settlement carries exactly one transfer, got {}",
                    transfers.len()
                ),
            });
        }
        self.gate.ensure_bindable(caller, commitment)?;
        self.create(caller, transfers, timeout_blocks, Some(commitment))
    }

    fn create(
        &mut self,
        caller: AccountId,
        transfers: Vec<TransferRequest>,
        timeout_blocks: u64,
        commitment: Option<CommitmentHash>,
    ) -> Result<SettlementId> {
        self.access.ensure_live()?;
        if caller.is_null() {
            return Err(FairsettleError::NullAddress { what: "initiator" });
        }

        let max_transfers = self.config.settlement.max_transfers;
        let max_timeout = self.config.settlement.max_timeout_blocks;
        if transfers.is_empty() {
            return Err(FairsettleError::EmptyTransfers);
        }
        if transfers.len() > max_transfers {
            return Err(FairsettleError::TooManyTransfers {
                count: transfers.len(),
                max: max_transfers,
            });
        }
        if timeout_blocks == 0 || timeout_blocks > max_timeout {
            return Err(FairsettleError::InvalidTimeout {
                blocks: timeout_blocks,
                max: max_timeout,
            });
        }

        let mut total_required = Decimal::ZERO;
        for (index, t) in transfers.iter().enumerate() {
            if t.amount <= Decimal::ZERO {
                return Err(FairsettleError::ZeroAmount { index: Some(index) });
            }
            if t.recipient.is_null() {
                return Err(FairsettleError::NullRecipient { index });
            }
            if t.sender.is_null() {
                return Err(FairsettleError::NullAddress { what: "sender" });
            }
            total_required = total_required
                .checked_add(t.amount)
                .ok_or(FairsettleError::AmountOverflow)?;
        }

        if let Some(hash) = commitment {
            self.gate.bind(caller, hash)?;
        }
        let id = self.next_id;
        let queue_position = self.queue.enqueue(id);
        self.next_id = id.next();
        let transfer_count = transfers.len();
        self.settlements.insert(
            id,
            Settlement {
                id,
                initiator: caller,
                transfers: transfers.into_iter().map(Transfer::from).collect(),
                total_required,
                total_deposited: Decimal::ZERO,
                deposits: BTreeMap::new(),
                state: SettlementState::Pending,
                created_at: self.chain.height,
                initiated_at: None,
                timeout_blocks,
                queue_position,
                executed_count: 0,
                total_paid: Decimal::ZERO,
                total_refunded: Decimal::ZERO,
                initiation_price: None,
                commitment,
                dispute: None,
                finalized_at: None,
            },
        );

        info!(
            settlement = %id,
            initiator = %caller.short(),
            transfers = transfer_count,
            total = %total_required,
            queue_position,
            "settlement created"
        );
        self.emit(EventPayload::SettlementCreated {
            id,
            initiator: caller,
            transfers: transfer_count,
            total_required,
            queue_position,
        });
        Ok(id)
    }

    /// Escrow `amount` from `caller` toward a PENDING settlement.
    ///
    /// Returns the new deposited total.
    pub fn deposit(&mut self, caller: AccountId, id: SettlementId, amount: Decimal) -> Result<Decimal> {
        self.access.ensure_live()?;
        if caller.is_null() {
            return Err(FairsettleError::NullAddress { what: "depositor" });
        }
        if amount <= Decimal::ZERO {
            return Err(FairsettleError::ZeroAmount { index: None });
        }
        let height = self.chain.height;
        let s = self.get(id)?;
        require_state(s, &[SettlementState::Pending], "PENDING")?;
        if s.is_timed_out(height) {
            return Err(FairsettleError::SettlementTimedOut(id));
        }
        let outstanding = s.outstanding();
        if amount > outstanding {
            return Err(FairsettleError::ExcessDeposit {
                amount,
                outstanding,
            });
        }
        let total_deposited = s
            .total_deposited
            .checked_add(amount)
            .ok_or(FairsettleError::AmountOverflow)?;
        let depositor_total = s
            .deposits
            .get(&caller)
            .copied()
            .unwrap_or(Decimal::ZERO)
            .checked_add(amount)
            .ok_or(FairsettleError::AmountOverflow)?;
        let mut conservation = self.conservation.clone();
        conservation.record_deposit(amount)?;

        let s = self
            .settlements
            .get_mut(&id)
            .ok_or(FairsettleError::SettlementNotFound(id))?;
        s.deposits.insert(caller, depositor_total);
        s.total_deposited = total_deposited;
        self.conservation = conservation;

        info!(settlement = %id, depositor = %caller.short(), %amount, total = %total_deposited, "deposited");
        self.emit(EventPayload::Deposited {
            id,
            depositor: caller,
            amount,
            total_deposited,
        });
        Ok(total_deposited)
    }

    /// Move the queue-head settlement PENDING → INITIATED at a reliable price.
    ///
    /// Checks run cheapest first; the oracle round is last. An unreliable
    /// round still updates oracle bookkeeping (scores, breaker) but leaves
    /// the settlement and queue untouched.
    pub fn initiate_settlement(&mut self, id: SettlementId) -> Result<AggregatedPrice> {
        self.access.ensure_live()?;
        let height = self.chain.height;
        let s = self.get(id)?;
        require_state(s, &[SettlementState::Pending], "PENDING")?;
        if s.is_timed_out(height) {
            return Err(FairsettleError::SettlementTimedOut(id));
        }
        if let Err(e) = self.queue.ensure_head(id) {
            warn!(settlement = %id, head = ?self.queue.head(), "FIFO bypass attempt rejected");
            return Err(e);
        }
        if s.total_deposited < s.total_required {
            return Err(FairsettleError::InsufficientDeposits {
                id,
                required: s.total_required,
                deposited: s.total_deposited,
            });
        }

        let round = self.oracle.get_aggregated_price(&self.chain);
        self.drain_oracle_events();
        let aggregate = round?;
        let price = aggregate.reliable_median().inspect_err(|e| {
            warn!(settlement = %id, error = %e, "initiation refused: price unreliable");
        })?;

        let s = self
            .settlements
            .get_mut(&id)
            .ok_or(FairsettleError::SettlementNotFound(id))?;
        transition(s, SettlementState::Initiated)?;
        s.initiated_at = Some(height);
        s.initiation_price = Some(price);
        self.queue.pop_head(id)?;

        info!(settlement = %id, %price, confidence = aggregate.confidence, %height, "settlement initiated");
        self.emit(EventPayload::SettlementInitiated {
            id,
            price,
            confidence: aggregate.confidence,
        });
        Ok(aggregate)
    }

    /// Pay out up to `max_transfers` pending transfers.
    ///
    /// Requires INITIATED or EXECUTING, enough confirmations since
    /// initiation, and, for a commitment-bound settlement, a reveal whose
    /// intent pays exactly the bound transfer. Each call marks its batch
    /// executed and moves the settlement to EXECUTING (partial) or
    /// FINALIZED (done) before crediting recipients.
    pub fn execute_settlement(
        &mut self,
        id: SettlementId,
        max_transfers: usize,
    ) -> Result<ExecutionProgress> {
        self.access.ensure_live()?;
        if max_transfers == 0 {
            return Err(FairsettleError::InvalidArgument {
                reason: "max_transfers must be > 0".into(),
            });
        }
        let height = self.chain.height;
        let need = self.config.settlement.min_execution_confirmations;

        let s = self.get(id)?;
        require_state(
            s,
            &[SettlementState::Initiated, SettlementState::Executing],
            "INITIATED or EXECUTING",
        )?;
        let initiated_at = s
            .initiated_at
            .ok_or_else(|| FairsettleError::Internal(format!("{id} has no initiation height")))?;
        let have = height.confirmations_since(initiated_at);
        if have < need {
            warn!(settlement = %id, have, need, "execution before confirmation threshold rejected");
            return Err(FairsettleError::InsufficientConfirmations { have, need });
        }
        if let Some(commitment) = s.commitment {
            self.ensure_commitment_matches(s, commitment)?;
        }
        let batch: Vec<usize> = s.pending_transfer_indices().take(max_transfers).collect();
        self.payouts.ensure_unpaid(id, &batch)?;

        let credits: Vec<(AccountId, Decimal)> = batch
            .iter()
            .map(|&index| (s.transfers[index].recipient, s.transfers[index].amount))
            .collect();
        let amount_paid = credits
            .iter()
            .try_fold(Decimal::ZERO, |sum, (_, amount)| sum.checked_add(*amount))
            .ok_or(FairsettleError::AmountOverflow)?;
        let total_paid = s
            .total_paid
            .checked_add(amount_paid)
            .ok_or(FairsettleError::AmountOverflow)?;
        let executed_total = s.executed_count + batch.len();
        let target = if executed_total == s.transfers.len() {
            SettlementState::Finalized
        } else {
            SettlementState::Executing
        };
        let ledger_batch = self.ledger.prepare(&credits)?;
        let mut conservation = self.conservation.clone();
        conservation.record_payout(amount_paid)?;

        // Effects
        let s = self
            .settlements
            .get_mut(&id)
            .ok_or(FairsettleError::SettlementNotFound(id))?;
        transition(s, target)?;
        for &index in &batch {
            s.transfers[index].executed = true;
            self.payouts.mark_paid(id, index);
        }
        s.executed_count = executed_total;
        s.total_paid = total_paid;
        if target == SettlementState::Finalized {
            s.finalized_at = Some((height, self.chain.fingerprint()));
        }
        self.conservation = conservation;
        let progress = ExecutionProgress {
            id,
            executed_now: batch.len(),
            executed_total,
            transfer_count: s.transfers.len(),
            amount_paid,
            state: target,
        };

        // Interactions
        self.ledger.apply(ledger_batch);

        info!(
            settlement = %id,
            executed_now = progress.executed_now,
            executed_total = progress.executed_total,
            transfer_count = progress.transfer_count,
            paid = %amount_paid,
            state = %progress.state,
            "transfers executed"
        );
        self.emit(EventPayload::TransfersExecuted {
            id,
            executed_now: progress.executed_now,
            executed_total: progress.executed_total,
            amount_paid,
        });
        if progress.is_complete() {
            self.emit(EventPayload::SettlementFinalized { id });
        }
        Ok(progress)
    }

    /// Raise a dispute on an INITIATED settlement within the dispute window.
    pub fn dispute_settlement(&mut self, caller: AccountId, id: SettlementId, reason: &str) -> Result<()> {
        self.access.ensure_live()?;
        let height = self.chain.height;
        let window = self.config.settlement.dispute_window_blocks;
        let max_reason = self.config.settlement.max_dispute_reason_len;

        let s = self.get(id)?;
        require_state(s, &[SettlementState::Initiated], "INITIATED")?;
        let initiated_at = s
            .initiated_at
            .ok_or_else(|| FairsettleError::Internal(format!("{id} has no initiation height")))?;
        if height > initiated_at.plus(window) {
            return Err(FairsettleError::DisputeWindowClosed(id));
        }
        if !s.is_participant(&caller) {
            warn!(settlement = %id, caller = %caller.short(), "dispute by non-participant rejected");
            return Err(FairsettleError::NotParticipant { caller, id });
        }
        let reason = reason.trim();
        if reason.is_empty() || reason.len() > max_reason {
            return Err(FairsettleError::InvalidArgument {
                reason: format!("dispute reason must be 1..={max_reason} bytes"),
            });
        }

        let s = self.get_mut(id)?;
        transition(s, SettlementState::Disputed)?;
        s.dispute = Some(Dispute {
            disputant: caller,
            reason: reason.to_string(),
            raised_at: height,
            outcome: None,
        });

        warn!(settlement = %id, disputant = %caller.short(), reason, "settlement disputed");
        self.emit(EventPayload::SettlementDisputed {
            id,
            disputant: caller,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Admin ruling on an open dispute.
    ///
    /// `Upheld` leaves the settlement DISPUTED and refundable. `Dismissed`
    /// returns it to INITIATED with a fresh initiation height, restarting
    /// the confirmation count.
    pub fn resolve_dispute(
        &mut self,
        caller: AccountId,
        id: SettlementId,
        outcome: DisputeOutcome,
    ) -> Result<()> {
        self.access.ensure_admin(caller)?;
        let height = self.chain.height;
        let s = self.get(id)?;
        require_state(s, &[SettlementState::Disputed], "DISPUTED")?;
        let open = s.dispute.as_ref().is_some_and(|d| d.outcome.is_none());
        if !open {
            return Err(FairsettleError::InvalidArgument {
                reason: format!("dispute on {id} already resolved"),
            });
        }

        let s = self.get_mut(id)?;
        if outcome == DisputeOutcome::Dismissed {
            transition(s, SettlementState::Initiated)?;
            s.initiated_at = Some(height);
        }
        if let Some(dispute) = s.dispute.as_mut() {
            dispute.outcome = Some(outcome);
        }

        info!(settlement = %id, ?outcome, "dispute resolved");
        self.emit(EventPayload::DisputeResolved { id, outcome });
        Ok(())
    }

    /// Return every depositor's escrow and move the settlement to FAILED.
    ///
    /// Allowed for a PENDING settlement past its timeout, or a DISPUTED one
    /// whose dispute was upheld. Returns the amount refunded.
    pub fn refund_settlement(&mut self, id: SettlementId) -> Result<Decimal> {
        self.access.ensure_live()?;
        let height = self.chain.height;
        let s = self.get(id)?;
        match s.state {
            SettlementState::Pending => {
                if !s.is_timed_out(height) {
                    return Err(FairsettleError::TimeoutNotReached {
                        id,
                        expires_at: s.expires_at(),
                    });
                }
            }
            SettlementState::Disputed => {
                let upheld = s
                    .dispute
                    .as_ref()
                    .and_then(|d| d.outcome)
                    .is_some_and(|o| o == DisputeOutcome::Upheld);
                if !upheld {
                    return Err(FairsettleError::DisputeUnresolved(id));
                }
            }
            actual => {
                return Err(FairsettleError::InvalidState {
                    id,
                    expected: "PENDING (timed out) or DISPUTED (upheld)",
                    actual,
                });
            }
        }

        let from_state = s.state;
        let amount = s.escrowed();
        let credits: Vec<(AccountId, Decimal)> =
            s.deposits.iter().map(|(a, d)| (*a, *d)).collect();
        let total_refunded = s
            .total_refunded
            .checked_add(amount)
            .ok_or(FairsettleError::AmountOverflow)?;
        let ledger_batch = self.ledger.prepare(&credits)?;
        let mut conservation = self.conservation.clone();
        conservation.record_refund(amount)?;

        // Effects
        let s = self
            .settlements
            .get_mut(&id)
            .ok_or(FairsettleError::SettlementNotFound(id))?;
        transition(s, SettlementState::Failed)?;
        s.total_refunded = total_refunded;
        if from_state == SettlementState::Pending {
            self.queue.remove(s.queue_position);
        }
        self.conservation = conservation;

        // Interactions
        self.ledger.apply(ledger_batch);

        info!(settlement = %id, from = %from_state, %amount, "settlement refunded");
        self.emit(EventPayload::SettlementRefunded {
            id,
            from_state,
            amount,
        });
        Ok(amount)
    }

    /// Record an opaque commitment at the current height.
    pub fn commit(&mut self, caller: AccountId, hash: CommitmentHash) -> Result<()> {
        self.access.ensure_live()?;
        let result = self.gate.commit(caller, hash, self.chain.height);
        self.drain_gate_events();
        result
    }

    /// Reveal a previously committed intent at the current height.
    pub fn reveal(&mut self, caller: AccountId, intent: &SettlementIntent) -> Result<CommitmentHash> {
        self.access.ensure_live()?;
        let result = self.gate.reveal(caller, intent, self.chain.height);
        self.drain_gate_events();
        result
    }

    /// Run one aggregation round at the current chain view.
    pub fn get_aggregated_price(&mut self) -> Result<AggregatedPrice> {
        let round = self.oracle.get_aggregated_price(&self.chain);
        self.drain_oracle_events();
        round
    }

    // =================================================================
    // Admin surface
    // =================================================================

    pub fn configure_source(
        &mut self,
        caller: AccountId,
        class: SourceClass,
        identity: AccountId,
        feed: FeedSelector,
    ) -> Result<SourceId> {
        self.access.ensure_admin(caller)?;
        let result = self.oracle.configure_source(class, identity, feed);
        self.drain_oracle_events();
        result
    }

    pub fn set_source_active(&mut self, caller: AccountId, id: SourceId, active: bool) -> Result<()> {
        self.access.ensure_admin(caller)?;
        let result = self.oracle.set_source_active(id, active);
        self.drain_oracle_events();
        result
    }

    pub fn set_class_active(
        &mut self,
        caller: AccountId,
        class: SourceClass,
        active: bool,
    ) -> Result<usize> {
        self.access.ensure_admin(caller)?;
        let changed = self.oracle.set_class_active(class, active);
        self.drain_oracle_events();
        Ok(changed)
    }

    pub fn reset_circuit_breaker(&mut self, caller: AccountId) -> Result<()> {
        self.access.ensure_admin(caller)?;
        self.oracle.reset_circuit_breaker();
        info!(by = %caller.short(), "circuit breaker reset");
        self.drain_oracle_events();
        Ok(())
    }

    pub fn pause(&mut self, caller: AccountId) -> Result<()> {
        if self.access.pause(caller)? {
            warn!(by = %caller.short(), "protocol paused");
            self.emit(EventPayload::Paused { by: caller });
        }
        Ok(())
    }

    pub fn unpause(&mut self, caller: AccountId) -> Result<()> {
        if self.access.unpause(caller)? {
            info!(by = %caller.short(), "protocol unpaused");
            self.emit(EventPayload::Unpaused { by: caller });
        }
        Ok(())
    }

    pub fn transfer_admin(&mut self, caller: AccountId, new_admin: AccountId) -> Result<()> {
        let from = self.access.transfer_admin(caller, new_admin)?;
        info!(from = %from.short(), to = %new_admin.short(), "admin transferred");
        self.emit(EventPayload::AdminTransferred {
            from,
            to: new_admin,
        });
        Ok(())
    }

    /// Admin check for collaborators that extend the admin surface.
    pub fn ensure_admin(&self, caller: AccountId) -> Result<()> {
        self.access.ensure_admin(caller)
    }

    // =================================================================
    // Status getters and readiness predicates
    // =================================================================

    pub fn settlement(&self, id: SettlementId) -> Result<&Settlement> {
        self.get(id)
    }

    pub fn settlements(&self) -> impl Iterator<Item = &Settlement> {
        self.settlements.values()
    }

    #[must_use]
    pub fn queue_head(&self) -> Option<SettlementId> {
        self.queue.head()
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Whether `initiate_settlement(id)` would pass every check that does
    /// not need a fresh oracle round.
    #[must_use]
    pub fn can_initiate(&self, id: SettlementId) -> bool {
        let Ok(s) = self.get(id) else {
            return false;
        };
        !self.access.is_paused()
            && s.state == SettlementState::Pending
            && !s.is_timed_out(self.chain.height)
            && self.queue.is_head(id)
            && s.total_deposited >= s.total_required
            && self.oracle.breaker_level() != BreakerLevel::Emergency
            && self.oracle.active_source_count() >= self.config.oracle.bft_min_sources
    }

    #[must_use]
    pub fn can_execute(&self, id: SettlementId) -> bool {
        let Ok(s) = self.get(id) else {
            return false;
        };
        let confirmed = s.initiated_at.is_some_and(|at| {
            self.chain.height.confirmations_since(at)
                >= self.config.settlement.min_execution_confirmations
        });
        let revealed = s
            .commitment
            .is_none_or(|c| self.ensure_commitment_matches(s, c).is_ok());
        !self.access.is_paused()
            && matches!(s.state, SettlementState::Initiated | SettlementState::Executing)
            && confirmed
            && revealed
    }

    #[must_use]
    pub fn can_refund(&self, id: SettlementId) -> bool {
        let Ok(s) = self.get(id) else {
            return false;
        };
        let eligible = match s.state {
            SettlementState::Pending => s.is_timed_out(self.chain.height),
            SettlementState::Disputed => s
                .dispute
                .as_ref()
                .is_some_and(|d| d.outcome == Some(DisputeOutcome::Upheld)),
            _ => false,
        };
        eligible && !self.access.is_paused()
    }

    /// Balance credited to `account` by payouts and refunds.
    #[must_use]
    pub fn balance(&self, account: &AccountId) -> Decimal {
        self.ledger.balance(account)
    }

    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    #[must_use]
    pub fn latest_price(&self) -> Option<&AggregatedPrice> {
        self.oracle.latest()
    }

    #[must_use]
    pub fn oracle(&self) -> &OracleAggregator<S> {
        &self.oracle
    }

    /// The price-source collaborator, for adapters that push updates into it.
    pub fn feed_mut(&mut self) -> &mut S {
        self.oracle.feed_mut()
    }

    #[must_use]
    pub fn gate(&self) -> &CommitRevealGate {
        &self.gate
    }

    #[must_use]
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    #[must_use]
    pub fn admin(&self) -> AccountId {
        self.access.admin()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.access.is_paused()
    }

    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Append an event produced by a collaborator wrapping this engine.
    pub fn record_event(&mut self, payload: EventPayload) -> u64 {
        self.emit(payload)
    }

    /// Check that no value was created or destroyed.
    ///
    /// Per settlement: the deposit map sums to `total_deposited`, executed
    /// transfers sum to `total_paid`, and a FINALIZED settlement paid
    /// exactly its required total. Globally: running deposit, payout and
    /// refund totals balance against remaining escrow, and the ledger holds
    /// exactly what was paid and refunded.
    pub fn verify_conservation(&self) -> Result<()> {
        let mut escrowed = Decimal::ZERO;
        for s in self.settlements.values() {
            let deposited: Decimal = s.deposits.values().copied().sum();
            let executed: Decimal = s
                .transfers
                .iter()
                .filter(|t| t.executed)
                .map(|t| t.amount)
                .sum();
            if deposited != s.total_deposited || executed != s.total_paid {
                return Err(violation(format!(
                    "{}: deposits {deposited} vs recorded {}, executed {executed} vs paid {}",
                    s.id, s.total_deposited, s.total_paid
                )));
            }
            if s.escrowed() < Decimal::ZERO {
                return Err(violation(format!("{}: negative escrow {}", s.id, s.escrowed())));
            }
            if s.state == SettlementState::Finalized && s.total_paid != s.total_required {
                return Err(violation(format!(
                    "{}: finalized with {} paid of {} required",
                    s.id, s.total_paid, s.total_required
                )));
            }
            escrowed += s.escrowed();
        }
        self.conservation.verify(escrowed)?;

        let outflow = self.conservation.total_paid() + self.conservation.total_refunded();
        if self.ledger.total_credited() != outflow {
            return Err(violation(format!(
                "ledger credited {} but outflows total {outflow}",
                self.ledger.total_credited()
            )));
        }
        Ok(())
    }

    // =================================================================
    // Internals
    // =================================================================

    fn get(&self, id: SettlementId) -> Result<&Settlement> {
        self.settlements
            .get(&id)
            .ok_or(FairsettleError::SettlementNotFound(id))
    }

    fn get_mut(&mut self, id: SettlementId) -> Result<&mut Settlement> {
        self.settlements
            .get_mut(&id)
            .ok_or(FairsettleError::SettlementNotFound(id))
    }

    /// A bound settlement pays exactly what its committer revealed.
    fn ensure_commitment_matches(&self, s: &Settlement, commitment: CommitmentHash) -> Result<()> {
        let intent = self
            .gate
            .revealed_intent(&commitment)
            .ok_or(FairsettleError::CommitmentNotRevealed(commitment))?;
        let matches = matches!(
            s.transfers.as_slice(),
            [t] if t.sender == intent.from && t.recipient == intent.to && t.amount == intent.amount
        );
        if !matches {
            warn!(settlement = %s.id, commitment = %commitment.short(), "bound transfer differs from revealed intent");
            return Err(FairsettleError::CommitmentMismatch(commitment));
        }
        Ok(())
    }

    fn emit(&mut self, payload: EventPayload) -> u64 {
        self.events.emit(self.chain.height, payload)
    }

    fn drain_oracle_events(&mut self) {
        for payload in self.oracle.take_events() {
            self.emit(payload);
        }
    }

    fn drain_gate_events(&mut self) {
        for payload in self.gate.take_events() {
            self.emit(payload);
        }
    }
}

fn require_state(
    s: &Settlement,
    allowed: &[SettlementState],
    expected: &'static str,
) -> Result<()> {
    if allowed.contains(&s.state) {
        Ok(())
    } else {
        Err(FairsettleError::InvalidState {
            id: s.id,
            expected,
            actual: s.state,
        })
    }
}

/// The only place a settlement's state is written.
fn transition(s: &mut Settlement, target: SettlementState) -> Result<()> {
    if !s.state.can_transition_to(target) {
        return Err(FairsettleError::InvalidState {
            id: s.id,
            expected: "a state with a legal transition",
            actual: s.state,
        });
    }
    if s.state != target {
        debug!(settlement = %s.id, from = %s.state, to = %target, "state transition");
    }
    s.state = target;
    Ok(())
}

fn violation(reason: String) -> FairsettleError {
    tracing::error!(%reason, "value conservation violated");
    FairsettleError::ConservationViolation { reason }
}
