//! # fairsettle-types
//!
//! Shared types, errors, and configuration for the **FairSettle** settlement core.
//!
//! This crate is the leaf dependency of the workspace: every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`SettlementId`], [`AccountId`], [`SourceId`], [`CommitmentHash`], [`BlockHeight`]
//! - **Settlement model**: [`Settlement`], [`Transfer`], [`TransferRequest`], [`SettlementState`], [`Dispute`]
//! - **Price model**: [`SourceClass`], [`PriceObservation`], [`AggregatedPrice`], [`BreakerLevel`]
//! - **Finality model**: [`FinalityPhase`], [`FinalityRecord`], [`QuorumStatus`]
//! - **Host chain**: [`ChainView`], [`BlockFingerprint`]
//! - **Audit trail**: [`Event`], [`EventPayload`], [`EventLog`]
//! - **Configuration**: [`ProtocolConfig`] and its parameter groups
//! - **Errors**: [`FairsettleError`] with `FS_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod chain;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod finality;
pub mod ids;
pub mod price;
pub mod settlement;

pub use chain::*;
pub use config::*;
pub use error::*;
pub use event::*;
pub use finality::*;
pub use ids::*;
pub use price::*;
pub use settlement::*;

// Constants are accessed via `fairsettle_types::constants::FOO`
// (not re-exported to avoid name collisions).
