//! Effective-fee statistics over packed transactions.

use serde::Serialize;

use crate::config::ProjectionConfig;
use crate::types::{MempoolTransaction, StrippedTransaction};

/// Median fee and percentile fee range for one projected block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeStatistics {
    pub median_fee: f64,
    pub fee_range: Vec<f64>,
}

/// Picks the rate at `percentile` (0.0-1.0) from an ascending-sorted slice.
/// Index selection, no interpolation.
pub fn percentile(sorted_rates: &[f64], percentile: f64) -> f64 {
    if sorted_rates.is_empty() {
        return 0.0;
    }
    let index = (sorted_rates.len() as f64 * percentile).floor() as usize;
    sorted_rates[index.min(sorted_rates.len() - 1)]
}

/// Computes the fee statistics for a block from the effective fee rates of
/// every transaction packed into it.
pub fn effective_fee_statistics(rates: &[f64], config: &ProjectionConfig) -> FeeStatistics {
    if rates.is_empty() {
        return FeeStatistics {
            median_fee: 0.0,
            fee_range: Vec::new(),
        };
    }
    let mut sorted = rates.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let median_fee = percentile(&sorted, config.recommended_fee_percentile as f64 / 100.0);
    let fee_range = config
        .fee_range_percentiles
        .iter()
        .map(|p| percentile(&sorted, *p))
        .collect();

    FeeStatistics {
        median_fee,
        fee_range,
    }
}

/// Projects a mempool record into its compact client-facing form. The rate
/// is only present once the CPFP resolver or the template worker has
/// processed the transaction.
pub fn strip_transaction(tx: &MempoolTransaction) -> StrippedTransaction {
    let rate = if tx.cpfp_checked {
        Some(tx.effective_fee_per_vsize)
    } else {
        None
    };
    StrippedTransaction {
        txid: tx.txid,
        fee: tx.fee,
        vsize: tx.vsize(),
        rate,
    }
}
