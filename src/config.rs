//! Projection engine configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Consensus block weight limit in weight units.
pub const BLOCK_WEIGHT_UNITS: u64 = 4_000_000;

/// Default number of projected blocks to maintain.
pub const MEMPOOL_BLOCKS_AMOUNT: usize = 8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Tunables for the projection engine. Loading this from files or the
/// environment is the host's job; the engine only consumes the struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionConfig {
    /// Maximum weight of a projected block, in weight units.
    pub block_weight_units: u64,
    /// Number of projected blocks; the last one absorbs the overflow.
    pub mempool_blocks_amount: usize,
    /// Percentile (0-100) reported as each block's median fee.
    pub recommended_fee_percentile: u8,
    /// Percentiles (0.0-1.0, ascending) sampled for each block's fee range.
    pub fee_range_percentiles: Vec<f64>,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            block_weight_units: BLOCK_WEIGHT_UNITS,
            mempool_blocks_amount: MEMPOOL_BLOCKS_AMOUNT,
            recommended_fee_percentile: 50,
            fee_range_percentiles: vec![0.0, 0.1, 0.25, 0.5, 0.75, 0.9, 1.0],
        }
    }
}

impl ProjectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_weight_units == 0 {
            return Err(ConfigError::InvalidValue(
                "block_weight_units must be non-zero".to_string(),
            ));
        }
        if self.mempool_blocks_amount == 0 {
            return Err(ConfigError::InvalidValue(
                "mempool_blocks_amount must be non-zero".to_string(),
            ));
        }
        if self.recommended_fee_percentile > 100 {
            return Err(ConfigError::InvalidValue(format!(
                "recommended_fee_percentile {} out of range 0-100",
                self.recommended_fee_percentile
            )));
        }
        for p in &self.fee_range_percentiles {
            if !(0.0..=1.0).contains(p) {
                return Err(ConfigError::InvalidValue(format!(
                    "fee range percentile {p} out of range 0.0-1.0"
                )));
            }
        }
        Ok(())
    }

    /// Total weight beyond which the fast path stops resolving CPFP
    /// relationships: anything past this many full blocks keeps its own
    /// fee rate.
    pub(crate) fn resolution_weight_cap(&self) -> u64 {
        self.block_weight_units * self.mempool_blocks_amount as u64
    }

    /// Relaxed weight cap for the client-facing transaction subset of a
    /// block.
    pub(crate) fn relaxed_weight_cap(&self) -> f64 {
        self.block_weight_units as f64 * 1.2
    }
}
