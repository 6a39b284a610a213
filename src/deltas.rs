//! Projection snapshot diffing.
//!
//! Compares two successive projections block-by-block so downstream
//! consumers can push compact updates instead of whole blocks. Deltas are
//! strictly per block index: a transaction that moves between blocks shows
//! up as removed at its old index and added at its new one.

use std::collections::{HashMap, HashSet};

use crate::types::{
    MempoolBlockDelta, MempoolBlockWithTransactions, StrippedTransaction, TxRateChange, Txid,
};

/// Diffs `prev` against `new`, producing one delta per block index up to
/// the longer of the two projections.
pub fn compute_deltas(
    prev: &[MempoolBlockWithTransactions],
    new: &[MempoolBlockWithTransactions],
) -> Vec<MempoolBlockDelta> {
    let mut deltas = Vec::with_capacity(prev.len().max(new.len()));

    for index in 0..prev.len().max(new.len()) {
        let delta = match (prev.get(index), new.get(index)) {
            (None, Some(new_block)) => MempoolBlockDelta {
                added: new_block.transactions.clone(),
                removed: Vec::new(),
                changed: Vec::new(),
            },
            (Some(prev_block), None) => MempoolBlockDelta {
                added: Vec::new(),
                removed: prev_block.transactions.iter().map(|tx| tx.txid).collect(),
                changed: Vec::new(),
            },
            (Some(prev_block), Some(new_block)) => diff_blocks(prev_block, new_block),
            (None, None) => unreachable!("index bounded by max length"),
        };
        deltas.push(delta);
    }

    deltas
}

fn diff_blocks(
    prev: &MempoolBlockWithTransactions,
    new: &MempoolBlockWithTransactions,
) -> MempoolBlockDelta {
    let prev_rates: HashMap<Txid, Option<f64>> = prev
        .transactions
        .iter()
        .map(|tx| (tx.txid, tx.rate))
        .collect();
    let new_ids: HashSet<Txid> = new.transactions.iter().map(|tx| tx.txid).collect();

    let removed: Vec<Txid> = prev
        .transactions
        .iter()
        .filter(|tx| !new_ids.contains(&tx.txid))
        .map(|tx| tx.txid)
        .collect();

    let mut added: Vec<StrippedTransaction> = Vec::new();
    let mut changed: Vec<TxRateChange> = Vec::new();
    for tx in &new.transactions {
        match prev_rates.get(&tx.txid) {
            None => added.push(tx.clone()),
            Some(prev_rate) if *prev_rate != tx.rate => changed.push(TxRateChange {
                txid: tx.txid,
                rate: tx.rate,
            }),
            Some(_) => {}
        }
    }

    MempoolBlockDelta {
        added,
        removed,
        changed,
    }
}
