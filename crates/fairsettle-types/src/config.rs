//! Configuration types for a FairSettle deployment.
//!
//! Every struct deserializes with `#[serde(default)]`, so a JSON document
//! only needs the fields it overrides.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{FairsettleError, Result, SourceClass, constants};

/// Convert basis points to a decimal ratio (200 → 0.02).
#[must_use]
pub fn bps_to_ratio(bps: u32) -> Decimal {
    Decimal::new(i64::from(bps), 4)
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Execution-environment identity mixed into every commitment and
    /// fingerprint, so artifacts from one chain never validate on another.
    pub chain_id: u64,
    pub settlement: SettlementParams,
    pub oracle: OracleParams,
    pub commit_reveal: CommitRevealParams,
    pub finality: FinalityParams,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            settlement: SettlementParams::default(),
            oracle: OracleParams::default(),
            commit_reveal: CommitRevealParams::default(),
            finality: FinalityParams::default(),
        }
    }
}

impl ProtocolConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| FairsettleError::Configuration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations that would disable a safety gate.
    pub fn validate(&self) -> Result<()> {
        let s = &self.settlement;
        if s.max_transfers == 0 {
            return Err(cfg_err("settlement.max_transfers must be > 0"));
        }
        if s.min_execution_confirmations == 0 {
            return Err(cfg_err(
                "settlement.min_execution_confirmations must be > 0 (same-height execution)",
            ));
        }
        if s.max_timeout_blocks == 0 {
            return Err(cfg_err("settlement.max_timeout_blocks must be > 0"));
        }

        let o = &self.oracle;
        if o.bft_min_sources == 0 {
            return Err(cfg_err("oracle.bft_min_sources must be > 0"));
        }
        if o.outlier_threshold_bps == 0 {
            return Err(cfg_err("oracle.outlier_threshold_bps must be > 0"));
        }
        if o.history_capacity == 0 {
            return Err(cfg_err("oracle.history_capacity must be > 0"));
        }
        if o.min_price <= Decimal::ZERO || o.min_price >= o.max_price {
            return Err(cfg_err("oracle sanity range must satisfy 0 < min_price < max_price"));
        }
        if o.max_consecutive_failures == 0 {
            return Err(cfg_err("oracle.max_consecutive_failures must be > 0"));
        }

        if self.commit_reveal.min_reveal_delay_blocks == 0 {
            return Err(cfg_err(
                "commit_reveal.min_reveal_delay_blocks must be > 0 (same-block reveal)",
            ));
        }

        let f = &self.finality;
        if f.semi_final_confirmations == 0 || f.semi_final_confirmations >= f.final_confirmations {
            return Err(cfg_err(
                "finality thresholds must satisfy 0 < semi_final_confirmations < final_confirmations",
            ));
        }
        if f.max_reorg_depth == 0 {
            return Err(cfg_err("finality.max_reorg_depth must be > 0"));
        }
        Ok(())
    }
}

fn cfg_err(msg: &str) -> FairsettleError {
    FairsettleError::Configuration(msg.to_string())
}

/// Settlement engine parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementParams {
    pub max_transfers: usize,
    pub min_execution_confirmations: u64,
    pub dispute_window_blocks: u64,
    pub max_timeout_blocks: u64,
    pub max_dispute_reason_len: usize,
    pub max_retained_events: usize,
}

impl Default for SettlementParams {
    fn default() -> Self {
        Self {
            max_transfers: constants::MAX_TRANSFERS_PER_SETTLEMENT,
            min_execution_confirmations: constants::MIN_EXECUTION_CONFIRMATIONS,
            dispute_window_blocks: constants::DISPUTE_WINDOW_BLOCKS,
            max_timeout_blocks: constants::MAX_TIMEOUT_BLOCKS,
            max_dispute_reason_len: constants::MAX_DISPUTE_REASON_LEN,
            max_retained_events: constants::MAX_RETAINED_EVENTS,
        }
    }
}

/// Oracle aggregation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleParams {
    pub bft_min_sources: usize,
    pub outlier_threshold_bps: u32,
    pub history_capacity: usize,
    pub twap_window_secs: u64,
    pub push_staleness_secs: u64,
    pub pull_staleness_secs: u64,
    pub custom_staleness_secs: u64,
    pub recovery_step: u8,
    pub decay_step: u8,
    pub max_consecutive_failures: u32,
    /// Global sanity range, inclusive.
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub breaker_deviation_bps: u32,
    pub max_source_confidence_bps: u32,
    pub breaker_cooldown_aggregates: u32,
}

impl Default for OracleParams {
    fn default() -> Self {
        Self {
            bft_min_sources: constants::BFT_MIN_SOURCES,
            outlier_threshold_bps: constants::OUTLIER_THRESHOLD_BPS,
            history_capacity: constants::PRICE_HISTORY_CAPACITY,
            twap_window_secs: constants::TWAP_WINDOW_SECS,
            push_staleness_secs: constants::PUSH_STALENESS_SECS,
            pull_staleness_secs: constants::PULL_STALENESS_SECS,
            custom_staleness_secs: constants::CUSTOM_STALENESS_SECS,
            recovery_step: constants::RELIABILITY_RECOVERY_STEP,
            decay_step: constants::RELIABILITY_DECAY_STEP,
            max_consecutive_failures: constants::MAX_CONSECUTIVE_FAILURES,
            min_price: Decimal::new(1, 8),                 // 0.00000001
            max_price: Decimal::new(1_000_000_000_000, 0), // 1e12
            breaker_deviation_bps: constants::BREAKER_DEVIATION_BPS,
            max_source_confidence_bps: constants::MAX_SOURCE_CONFIDENCE_BPS,
            breaker_cooldown_aggregates: constants::BREAKER_COOLDOWN_AGGREGATES,
        }
    }
}

impl OracleParams {
    /// Maximum tolerated observation age for a source class.
    #[must_use]
    pub fn staleness_bound(&self, class: SourceClass) -> u64 {
        match class {
            SourceClass::Push => self.push_staleness_secs,
            SourceClass::Pull => self.pull_staleness_secs,
            SourceClass::Custom => self.custom_staleness_secs,
        }
    }

    #[must_use]
    pub fn outlier_ratio(&self) -> Decimal {
        bps_to_ratio(self.outlier_threshold_bps)
    }

    #[must_use]
    pub fn breaker_deviation_ratio(&self) -> Decimal {
        bps_to_ratio(self.breaker_deviation_bps)
    }

    #[must_use]
    pub fn max_confidence_ratio(&self) -> Decimal {
        bps_to_ratio(self.max_source_confidence_bps)
    }
}

/// Commit-reveal gate parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitRevealParams {
    pub min_reveal_delay_blocks: u64,
}

impl Default for CommitRevealParams {
    fn default() -> Self {
        Self {
            min_reveal_delay_blocks: constants::MIN_REVEAL_DELAY_BLOCKS,
        }
    }
}

/// Finality controller parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalityParams {
    pub semi_final_confirmations: u64,
    pub final_confirmations: u64,
    pub max_reorg_depth: u64,
}

impl Default for FinalityParams {
    fn default() -> Self {
        Self {
            semi_final_confirmations: constants::SEMI_FINAL_CONFIRMATIONS,
            final_confirmations: constants::FINAL_CONFIRMATIONS,
            max_reorg_depth: constants::MAX_REORG_DEPTH,
        }
    }
}
