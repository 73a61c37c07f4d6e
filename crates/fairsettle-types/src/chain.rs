//! The host-chain signal: the only clock the core observes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{BlockHeight, FairsettleError, Result, constants};

/// Fingerprint of the chain state at one height.
///
/// `SHA-256("fairsettle:block:v1:" || chain_id || height || block_hash)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockFingerprint(pub [u8; 32]);

impl BlockFingerprint {
    #[must_use]
    pub fn of(chain_id: u64, height: BlockHeight, block_hash: &[u8; 32]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(constants::FINGERPRINT_DOMAIN);
        hasher.update(chain_id.to_le_bytes());
        hasher.update(height.0.to_le_bytes());
        hasher.update(block_hash);
        let result = hasher.finalize();
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&result);
        Self(digest)
    }
}

impl std::fmt::Display for BlockFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// What the core currently knows about the host chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainView {
    /// Execution-environment identity, used for domain separation.
    pub chain_id: u64,
    pub height: BlockHeight,
    pub timestamp: DateTime<Utc>,
    pub block_hash: [u8; 32],
}

impl ChainView {
    /// Genesis view at height 0.
    #[must_use]
    pub fn genesis(chain_id: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            chain_id,
            height: BlockHeight(0),
            timestamp,
            block_hash: [0u8; 32],
        }
    }

    /// Advance to a newly observed block. Height may not decrease.
    pub fn observe(
        &mut self,
        height: BlockHeight,
        timestamp: DateTime<Utc>,
        block_hash: [u8; 32],
    ) -> Result<()> {
        if height < self.height {
            return Err(FairsettleError::NonMonotonicHeight {
                new: height,
                current: self.height,
            });
        }
        self.height = height;
        self.timestamp = timestamp;
        self.block_hash = block_hash;
        Ok(())
    }

    /// Fingerprint of the current block.
    #[must_use]
    pub fn fingerprint(&self) -> BlockFingerprint {
        BlockFingerprint::of(self.chain_id, self.height, &self.block_hash)
    }
}
