//! Error types for the FairSettle core.
//!
//! All errors use the `FS_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by taxonomy:
//! - 1xx: Validation (malformed input)
//! - 2xx: State (operation invalid for the current phase)
//! - 3xx: Authorization (privileged operation by an unprivileged caller)
//! - 4xx: Oracle (stale, out-of-bounds, or insufficient price data)
//! - 5xx: Ordering (FIFO bypass, bad reveal, nonce reuse)
//! - 6xx: Reorg (ancestor fingerprint mismatch)
//! - 9xx: General / internal
//!
//! Every error aborts the triggering call with no partial mutation. The one
//! intended partial outcome, a resumable `execute_settlement`, is reported
//! through its return value rather than an error.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{AccountId, BlockHeight, CommitmentHash, SettlementId, SettlementState, SourceId};

/// Taxonomy bucket of a [`FairsettleError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Validation,
    State,
    Authorization,
    Oracle,
    Ordering,
    Reorg,
    Internal,
}

/// Central error enum for all FairSettle operations.
#[derive(Debug, Error)]
pub enum FairsettleError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// A settlement must carry at least one transfer.
    #[error("FS_ERR_100: Settlement has no transfers")]
    EmptyTransfers,

    /// Too many transfers in one settlement.
    #[error("FS_ERR_101: Too many transfers: {count} exceeds maximum {max}")]
    TooManyTransfers { count: usize, max: usize },

    /// A transfer or deposit amount was zero or negative.
    #[error("FS_ERR_102: Amount must be positive (transfer index {index:?})")]
    ZeroAmount { index: Option<usize> },

    /// A transfer targets the null address.
    #[error("FS_ERR_103: Null recipient at transfer index {index}")]
    NullRecipient { index: usize },

    /// An identity argument was the null address.
    #[error("FS_ERR_104: Null address supplied for {what}")]
    NullAddress { what: &'static str },

    /// Timeout outside `1..=max`.
    #[error("FS_ERR_105: Invalid timeout {blocks} blocks (allowed 1..={max})")]
    InvalidTimeout { blocks: u64, max: u64 },

    /// Summing amounts overflowed.
    #[error("FS_ERR_106: Amount overflow")]
    AmountOverflow,

    /// A deposit would exceed the settlement's outstanding requirement.
    #[error("FS_ERR_107: Deposit {amount} exceeds outstanding requirement {outstanding}")]
    ExcessDeposit { amount: Decimal, outstanding: Decimal },

    /// No settlement with this id exists.
    #[error("FS_ERR_108: Settlement not found: {0}")]
    SettlementNotFound(SettlementId),

    /// Generic malformed argument.
    #[error("FS_ERR_109: Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The host chain height moved backwards.
    #[error("FS_ERR_110: Non-monotonic height: {new} < {current}")]
    NonMonotonicHeight { new: BlockHeight, current: BlockHeight },

    // =================================================================
    // State Errors (2xx)
    // =================================================================
    /// The settlement is not in a state that permits this operation.
    #[error("FS_ERR_200: Settlement {id} is {actual}, operation requires {expected}")]
    InvalidState {
        id: SettlementId,
        expected: &'static str,
        actual: SettlementState,
    },

    /// Deposits have not reached the required total.
    #[error("FS_ERR_201: Insufficient deposits for {id}: need {required}, have {deposited}")]
    InsufficientDeposits {
        id: SettlementId,
        required: Decimal,
        deposited: Decimal,
    },

    /// Not enough confirmations since the reference event.
    #[error("FS_ERR_202: Insufficient confirmations: have {have}, need {need}")]
    InsufficientConfirmations { have: u64, need: u64 },

    /// The dispute window has closed.
    #[error("FS_ERR_203: Dispute window closed for {0}")]
    DisputeWindowClosed(SettlementId),

    /// A PENDING settlement cannot be refunded before its timeout.
    #[error("FS_ERR_204: Timeout not reached for {id}: expires after {expires_at}")]
    TimeoutNotReached { id: SettlementId, expires_at: BlockHeight },

    /// A PENDING settlement past its timeout can only be refunded.
    #[error("FS_ERR_205: Settlement {0} timed out")]
    SettlementTimedOut(SettlementId),

    /// The protocol is paused by the admin.
    #[error("FS_ERR_206: Protocol is paused")]
    Paused,

    /// No finality record exists for the settlement (not yet executed).
    #[error("FS_ERR_207: No finality record for {0}")]
    NoFinalityRecord(SettlementId),

    /// A DISPUTED settlement has not been resolved adversely.
    #[error("FS_ERR_208: Dispute on {0} is unresolved")]
    DisputeUnresolved(SettlementId),

    // =================================================================
    // Authorization Errors (3xx)
    // =================================================================
    /// Caller is not the admin.
    #[error("FS_ERR_300: {0} is not the admin")]
    NotAdmin(AccountId),

    /// Caller is not a registered validator.
    #[error("FS_ERR_301: {0} is not a registered validator")]
    NotValidator(AccountId),

    /// Caller is not a party to the settlement.
    #[error("FS_ERR_302: {caller} is not a participant of {id}")]
    NotParticipant { caller: AccountId, id: SettlementId },

    /// A validator vote signature did not verify.
    #[error("FS_ERR_303: Invalid vote signature from {0}")]
    InvalidVoteSignature(AccountId),

    // =================================================================
    // Oracle Errors (4xx)
    // =================================================================
    /// The aggregate was computed but is not reliable.
    #[error("FS_ERR_400: Price unreliable: {reason}")]
    PriceUnreliable { reason: String },

    /// The circuit breaker is at EMERGENCY.
    #[error("FS_ERR_401: Circuit breaker tripped; admin reset required")]
    CircuitBreakerTripped,

    /// No source with this id is configured.
    #[error("FS_ERR_402: Price source not found: {0}")]
    SourceNotFound(SourceId),

    // =================================================================
    // Ordering Errors (5xx)
    // =================================================================
    /// The settlement is not at the head of the FIFO queue.
    #[error("FS_ERR_500: {id} is not at the queue head (head is {head:?})")]
    NotQueueHead {
        id: SettlementId,
        head: Option<SettlementId>,
    },

    /// An open commitment with this hash already exists.
    #[error("FS_ERR_501: Already committed: {0}")]
    AlreadyCommitted(CommitmentHash),

    /// No unrevealed commitment matches.
    #[error("FS_ERR_502: No open commitment matches {0}")]
    CommitmentNotFound(CommitmentHash),

    /// Reveal attempted before the minimum delay elapsed.
    #[error("FS_ERR_503: Reveal too early: committed at {committed_at}, earliest reveal {earliest}")]
    RevealTooEarly {
        committed_at: BlockHeight,
        earliest: BlockHeight,
    },

    /// Reveal attempted after the intent's deadline.
    #[error("FS_ERR_504: Reveal past deadline {deadline}")]
    RevealExpired { deadline: BlockHeight },

    /// Nonce does not equal the committer's expected counter.
    #[error("FS_ERR_505: Invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },

    /// The revealer did not make the commitment.
    #[error("FS_ERR_506: Committer mismatch for {0}")]
    CommitterMismatch(CommitmentHash),

    /// A commitment-bound settlement has not been revealed yet.
    #[error("FS_ERR_507: Commitment {0} not revealed")]
    CommitmentNotRevealed(CommitmentHash),

    /// The commitment already guards another settlement.
    #[error("FS_ERR_508: Commitment {0} is already bound to a settlement")]
    CommitmentAlreadyBound(CommitmentHash),

    /// The revealed intent does not describe the bound settlement's transfer.
    #[error("FS_ERR_509: Revealed intent for {0} does not match the settlement transfer")]
    CommitmentMismatch(CommitmentHash),

    // =================================================================
    // Reorg Errors (6xx)
    // =================================================================
    /// The chain state observed at execution no longer matches.
    #[error("FS_ERR_600: Reorg detected for {id}, estimated depth {estimated_depth}")]
    ReorgDetected {
        id: SettlementId,
        estimated_depth: u64,
    },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("FS_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("FS_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("FS_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// Value conservation invariant violated. Critical safety alert.
    #[error("FS_ERR_903: Conservation violation: {reason}")]
    ConservationViolation { reason: String },
}

impl FairsettleError {
    /// Which taxonomy bucket this error belongs to.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::EmptyTransfers
            | Self::TooManyTransfers { .. }
            | Self::ZeroAmount { .. }
            | Self::NullRecipient { .. }
            | Self::NullAddress { .. }
            | Self::InvalidTimeout { .. }
            | Self::AmountOverflow
            | Self::ExcessDeposit { .. }
            | Self::SettlementNotFound(_)
            | Self::InvalidArgument { .. }
            | Self::NonMonotonicHeight { .. } => ErrorClass::Validation,

            Self::InvalidState { .. }
            | Self::InsufficientDeposits { .. }
            | Self::InsufficientConfirmations { .. }
            | Self::DisputeWindowClosed(_)
            | Self::TimeoutNotReached { .. }
            | Self::SettlementTimedOut(_)
            | Self::Paused
            | Self::NoFinalityRecord(_)
            | Self::DisputeUnresolved(_) => ErrorClass::State,

            Self::NotAdmin(_)
            | Self::NotValidator(_)
            | Self::NotParticipant { .. }
            | Self::InvalidVoteSignature(_) => ErrorClass::Authorization,

            Self::PriceUnreliable { .. }
            | Self::CircuitBreakerTripped
            | Self::SourceNotFound(_) => ErrorClass::Oracle,

            Self::NotQueueHead { .. }
            | Self::AlreadyCommitted(_)
            | Self::CommitmentNotFound(_)
            | Self::RevealTooEarly { .. }
            | Self::RevealExpired { .. }
            | Self::InvalidNonce { .. }
            | Self::CommitterMismatch(_)
            | Self::CommitmentNotRevealed(_)
            | Self::CommitmentAlreadyBound(_)
            | Self::CommitmentMismatch(_) => ErrorClass::Ordering,

            Self::ReorgDetected { .. } => ErrorClass::Reorg,

            Self::Internal(_)
            | Self::Serialization(_)
            | Self::Configuration(_)
            | Self::ConservationViolation { .. } => ErrorClass::Internal,
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, FairsettleError>;

impl From<serde_json::Error> for FairsettleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
