//! System-wide constants for the FairSettle core.
//!
//! Heights are in host-chain blocks, ages in seconds, scores on a 0..=100 scale.

// --- Settlement engine ---

/// Maximum number of transfers in a single settlement.
pub const MAX_TRANSFERS_PER_SETTLEMENT: usize = 100;

/// Confirmations required between initiation and the first execution call.
pub const MIN_EXECUTION_CONFIRMATIONS: u64 = 3;

/// Blocks after initiation during which a settlement may be disputed.
pub const DISPUTE_WINDOW_BLOCKS: u64 = 50;

/// Upper bound on a settlement's timeout.
pub const MAX_TIMEOUT_BLOCKS: u64 = 100_000;

/// Maximum length (bytes) of a dispute reason.
pub const MAX_DISPUTE_REASON_LEN: usize = 256;

/// Events retained in memory before the oldest are drained.
pub const MAX_RETAINED_EVENTS: usize = 10_000;

// --- Oracle aggregation ---

/// Byzantine-tolerant minimum of valid, non-outlier observations.
pub const BFT_MIN_SOURCES: usize = 3;

/// Maximum deviation from the median before an observation is an outlier,
/// in basis points (200 = 2%).
pub const OUTLIER_THRESHOLD_BPS: u32 = 200;

/// Capacity of the aggregated-price ring buffer.
pub const PRICE_HISTORY_CAPACITY: usize = 100;

/// Rolling window for the time-weighted average.
pub const TWAP_WINDOW_SECS: u64 = 1800;

/// Staleness bound for push-style (latest-round) feeds.
pub const PUSH_STALENESS_SECS: u64 = 3600;

/// Staleness bound for pull-style (on-demand, real-time) feeds.
pub const PULL_STALENESS_SECS: u64 = 60;

/// Staleness bound for custom / self-operated feeds.
pub const CUSTOM_STALENESS_SECS: u64 = 300;

/// Seeded reliability for push-style feeds.
pub const PUSH_SEED_RELIABILITY: u8 = 95;

/// Seeded reliability for pull-style feeds.
pub const PULL_SEED_RELIABILITY: u8 = 75;

/// Seeded reliability for custom feeds.
pub const CUSTOM_SEED_RELIABILITY: u8 = 60;

/// Reliability regained per successful read.
pub const RELIABILITY_RECOVERY_STEP: u8 = 1;

/// Reliability lost per stale, failed, or outlier read.
pub const RELIABILITY_DECAY_STEP: u8 = 10;

/// Consecutive failures after which a source is auto-disabled.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Deviation between successive aggregates that escalates the breaker (bps).
pub const BREAKER_DEVIATION_BPS: u32 = 500;

/// Maximum reported confidence interval as a fraction of price (bps).
pub const MAX_SOURCE_CONFIDENCE_BPS: u32 = 200;

/// Healthy aggregates required before the breaker steps down one level.
pub const BREAKER_COOLDOWN_AGGREGATES: u32 = 10;

// --- Commit-reveal ---

/// Minimum blocks between commit and reveal.
pub const MIN_REVEAL_DELAY_BLOCKS: u64 = 1;

// --- Finality ---

/// Confirmations after execution for SEMI_FINAL.
pub const SEMI_FINAL_CONFIRMATIONS: u64 = 12;

/// Confirmations after execution for FINAL.
pub const FINAL_CONFIRMATIONS: u64 = 64;

/// Deepest reorg the controller reasons about.
pub const MAX_REORG_DEPTH: u64 = 128;

/// Minimum confidence while TENTATIVE.
pub const TENTATIVE_CONFIDENCE: u8 = 30;

/// Minimum confidence while SEMI_FINAL.
pub const SEMI_FINAL_CONFIDENCE: u8 = 70;

/// Confidence once FINAL.
pub const FINAL_CONFIDENCE: u8 = 100;

// --- Domain separation tags ---

/// Prefix for commitment hashes.
pub const COMMITMENT_DOMAIN: &[u8] = b"fairsettle:commit:v1:";

/// Prefix for block fingerprints.
pub const FINGERPRINT_DOMAIN: &[u8] = b"fairsettle:block:v1:";

/// Prefix for validator vote payloads.
pub const VOTE_DOMAIN: &[u8] = b"fairsettle:vote:v1:";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
