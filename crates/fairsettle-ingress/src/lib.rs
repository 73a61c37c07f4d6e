//! # fairsettle-ingress
//!
//! **Ordering Plane**: decides *when* a settlement may move, never *what*
//! it does.
//!
//! - [`commit_reveal`]: [`CommitRevealGate`] hides intent details until the
//!   ordering that would let a sequencer front-run them is already fixed.
//! - [`queue`]: [`SettlementQueue`], the strict FIFO that settlements must
//!   leave PENDING through.

pub mod commit_reveal;
pub mod queue;

pub use commit_reveal::{CommitRevealGate, Commitment, SettlementIntent, commitment_hash};
pub use queue::SettlementQueue;
