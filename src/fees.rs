//! Recommended fee tiers derived from the current projection.
//!
//! Collapses the projected block medians into the handful of numbers a
//! wallet actually asks for: get into the next block, the next three, the
//! next six, or eventually.

use serde::Serialize;

use crate::types::MempoolBlock;

/// Relay floor in satoshis per virtual byte.
pub const MINIMUM_FEE_RATE: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecommendedFees {
    pub fastest_fee: u64,
    pub half_hour_fee: u64,
    pub hour_fee: u64,
    pub economy_fee: u64,
    pub minimum_fee: u64,
}

impl RecommendedFees {
    /// Derives the tiers from projected block summaries. Each tier falls
    /// back to the previous one when the projection is too shallow.
    pub fn from_blocks(blocks: &[MempoolBlock]) -> Self {
        let median = |index: usize| blocks.get(index).map(|block| block.median_fee);

        let fastest_fee = tier(median(0), MINIMUM_FEE_RATE);
        let half_hour_fee = tier(median(1), fastest_fee);
        let hour_fee = tier(median(2), half_hour_fee);
        let economy_fee = blocks
            .last()
            .map(|tail| tier(Some(tail.median_fee), MINIMUM_FEE_RATE).min(hour_fee))
            .unwrap_or(MINIMUM_FEE_RATE)
            .max(MINIMUM_FEE_RATE);

        Self {
            fastest_fee,
            half_hour_fee,
            hour_fee,
            economy_fee,
            minimum_fee: MINIMUM_FEE_RATE,
        }
    }
}

fn tier(median_fee: Option<f64>, fallback: u64) -> u64 {
    match median_fee {
        Some(rate) if rate > 0.0 => (rate.ceil() as u64).max(MINIMUM_FEE_RATE),
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(median_fee: f64) -> MempoolBlock {
        MempoolBlock {
            block_size: 0,
            block_vsize: 0.0,
            n_tx: 0,
            total_fees: 0,
            median_fee,
            fee_range: Vec::new(),
        }
    }

    #[test]
    fn test_empty_projection_floors_everything() {
        let fees = RecommendedFees::from_blocks(&[]);
        assert_eq!(fees.fastest_fee, 1);
        assert_eq!(fees.half_hour_fee, 1);
        assert_eq!(fees.hour_fee, 1);
        assert_eq!(fees.economy_fee, 1);
        assert_eq!(fees.minimum_fee, 1);
    }

    #[test]
    fn test_tiers_follow_block_medians() {
        let blocks = vec![block(50.2), block(20.0), block(10.0), block(2.0)];
        let fees = RecommendedFees::from_blocks(&blocks);
        assert_eq!(fees.fastest_fee, 51);
        assert_eq!(fees.half_hour_fee, 20);
        assert_eq!(fees.hour_fee, 10);
        assert_eq!(fees.economy_fee, 2);
    }

    #[test]
    fn test_shallow_projection_reuses_deeper_tier() {
        let blocks = vec![block(30.0)];
        let fees = RecommendedFees::from_blocks(&blocks);
        assert_eq!(fees.fastest_fee, 30);
        assert_eq!(fees.half_hour_fee, 30);
        assert_eq!(fees.hour_fee, 30);
        // A one-block mempool is also the tail.
        assert_eq!(fees.economy_fee, 30);
    }

    #[test]
    fn test_economy_never_exceeds_hour() {
        // Pathological tail with a higher median than block three.
        let blocks = vec![block(10.0), block(8.0), block(6.0), block(9.0)];
        let fees = RecommendedFees::from_blocks(&blocks);
        assert_eq!(fees.economy_fee, 6);
    }
}
