//! # fairsettle-finality
//!
//! **Finality Plane**: what happens to a settlement after it finalizes.
//!
//! [`FinalityController`] wraps a [`SettlementEngine`](fairsettle_settlement::SettlementEngine)
//! and keeps one [`FinalityRecord`](fairsettle_types::FinalityRecord) per
//! executed settlement:
//!
//! - **Staged finality**: TENTATIVE → SEMI_FINAL → FINAL as confirmations
//!   accrue, never backwards except through admin reorg recovery
//! - **Reorg detection**: the block fingerprint recorded at execution is
//!   compared against one supplied by the caller
//! - **Validator quorum**: [`ValidatorSet`] holds ed25519 keys; votes are
//!   signatures over the execution fingerprint
//!
//! Reorg protection against double payment comes from the engine's
//! confirmation gate. Nothing here rolls settlement state back.

pub mod controller;
pub mod validators;

pub use controller::{FinalityController, confidence_for, phase_for};
pub use validators::{ValidatorSet, required_votes, vote_message};
