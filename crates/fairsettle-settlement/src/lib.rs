//! # fairsettle-settlement
//!
//! **Settlement Plane**: settlement records, escrow, FIFO initiation, and
//! resumable payouts.
//!
//! ## Architecture
//!
//! [`SettlementEngine`] owns every settlement and drives it through:
//! 1. `create_settlement`: validate transfers, assign id and queue position
//! 2. `deposit`: escrow per depositor, capped at the outstanding requirement
//! 3. `initiate_settlement`: queue head only, fully funded, reliable price
//! 4. `execute_settlement`: after the confirmation gate, in bounded batches
//! 5. `dispute_settlement` / `resolve_dispute` / `refund_settlement`
//!
//! Supporting pieces:
//! - [`PayoutGuard`]: at-most-once payout per `(settlement, transfer)`
//! - [`ValueConservation`]: Σ deposits == Σ paid + Σ refunded + Σ escrowed
//! - [`Ledger`]: where payouts and refunds land
//! - [`AccessControl`]: admin identity and pause switch

pub mod access;
pub mod conservation;
pub mod engine;
pub mod idempotency;
pub mod ledger;

pub use access::AccessControl;
pub use conservation::ValueConservation;
pub use engine::{ExecutionProgress, SettlementEngine};
pub use idempotency::PayoutGuard;
pub use ledger::{CreditBatch, Ledger};
