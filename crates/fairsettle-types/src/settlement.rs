//! # Settlement: the escrowed multi-party transfer record
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────┐ initiate ┌───────────┐ execute ┌───────────┐ last leg ┌───────────┐
//!   │ PENDING ├─────────▶│ INITIATED ├────────▶│ EXECUTING ├─────────▶│ FINALIZED │
//!   └────┬────┘          └─────┬─────┘         └───────────┘          └───────────┘
//!        │ timeout             │ dispute
//!        ▼                     ▼
//!   ┌────────┐  upheld+refund ┌──────────┐
//!   │ FAILED │◀───────────────┤ DISPUTED │
//!   └────────┘                └──────────┘
//! ```
//!
//! `INITIATED` may jump straight to `FINALIZED` when one execution call pays
//! every transfer. A dismissed dispute returns the settlement to `INITIATED`.
//! Terminal records are never deleted.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountId, BlockFingerprint, BlockHeight, CommitmentHash, SettlementId};

/// Lifecycle state of a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementState {
    /// Created, queued, collecting deposits.
    Pending,
    /// Left the queue with a reliable price; waiting for confirmations.
    Initiated,
    /// Some but not all transfers paid.
    Executing,
    /// Every transfer paid. **Terminal.**
    Finalized,
    /// Disputed inside the dispute window.
    Disputed,
    /// Refunded after timeout or an upheld dispute. **Terminal.**
    Failed,
}

impl SettlementState {
    /// Can a settlement in this state move to `target`?
    ///
    /// `Executing → Executing` is a further partial batch.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Initiated | Self::Failed)
                | (Self::Initiated, Self::Executing | Self::Finalized | Self::Disputed)
                | (Self::Executing, Self::Executing | Self::Finalized)
                | (Self::Disputed, Self::Failed | Self::Initiated)
        )
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::Failed)
    }
}

impl std::fmt::Display for SettlementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Initiated => write!(f, "INITIATED"),
            Self::Executing => write!(f, "EXECUTING"),
            Self::Finalized => write!(f, "FINALIZED"),
            Self::Disputed => write!(f, "DISPUTED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Caller-supplied transfer leg, validated by `create_settlement`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub sender: AccountId,
    pub recipient: AccountId,
    pub amount: Decimal,
}

impl TransferRequest {
    #[must_use]
    pub fn new(sender: AccountId, recipient: AccountId, amount: Decimal) -> Self {
        Self {
            sender,
            recipient,
            amount,
        }
    }
}

/// One leg of a settlement. Immutable except for `executed`, which flips once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub sender: AccountId,
    pub recipient: AccountId,
    pub amount: Decimal,
    pub executed: bool,
}

impl From<TransferRequest> for Transfer {
    fn from(req: TransferRequest) -> Self {
        Self {
            sender: req.sender,
            recipient: req.recipient,
            amount: req.amount,
            executed: false,
        }
    }
}

/// How an admin resolved a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisputeOutcome {
    /// The dispute stands; the settlement becomes refundable.
    Upheld,
    /// The dispute is rejected; the settlement returns to INITIATED.
    Dismissed,
}

/// A dispute raised against an initiated settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub disputant: AccountId,
    pub reason: String,
    pub raised_at: BlockHeight,
    pub outcome: Option<DisputeOutcome>,
}

/// The settlement record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: SettlementId,
    pub initiator: AccountId,
    pub transfers: Vec<Transfer>,
    /// Sum of all transfer amounts.
    pub total_required: Decimal,
    /// Sum of all deposits ever accepted.
    pub total_deposited: Decimal,
    /// Per-depositor contributions, returned verbatim on refund.
    pub deposits: BTreeMap<AccountId, Decimal>,
    pub state: SettlementState,
    pub created_at: BlockHeight,
    pub initiated_at: Option<BlockHeight>,
    pub timeout_blocks: u64,
    /// Position in the FIFO queue (monotonic, assigned at creation).
    pub queue_position: u64,
    pub executed_count: usize,
    pub total_paid: Decimal,
    pub total_refunded: Decimal,
    /// Aggregated median used at initiation.
    pub initiation_price: Option<Decimal>,
    /// Commitment this settlement is bound to, if any.
    pub commitment: Option<CommitmentHash>,
    pub dispute: Option<Dispute>,
    /// Height and block fingerprint at which the last transfer was paid.
    pub finalized_at: Option<(BlockHeight, BlockFingerprint)>,
}

impl Settlement {
    /// Last height at which the settlement is still within its timeout.
    #[must_use]
    pub fn expires_at(&self) -> BlockHeight {
        self.created_at.plus(self.timeout_blocks)
    }

    #[must_use]
    pub fn is_timed_out(&self, now: BlockHeight) -> bool {
        now > self.expires_at()
    }

    /// Deposit still required before initiation.
    #[must_use]
    pub fn outstanding(&self) -> Decimal {
        (self.total_required - self.total_deposited).max(Decimal::ZERO)
    }

    /// Value currently held in escrow for this settlement.
    #[must_use]
    pub fn escrowed(&self) -> Decimal {
        self.total_deposited - self.total_paid - self.total_refunded
    }

    #[must_use]
    pub fn transfer_count(&self) -> usize {
        self.transfers.len()
    }

    #[must_use]
    pub fn all_executed(&self) -> bool {
        self.executed_count == self.transfers.len()
    }

    /// Indices of transfers not yet executed, in list order.
    pub fn pending_transfer_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.transfers
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.executed)
            .map(|(i, _)| i)
    }

    /// Initiator, any sender or recipient, or any depositor.
    #[must_use]
    pub fn is_participant(&self, account: &AccountId) -> bool {
        self.initiator == *account
            || self.deposits.contains_key(account)
            || self
                .transfers
                .iter()
                .any(|t| t.sender == *account || t.recipient == *account)
    }
}
