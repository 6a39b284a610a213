//! Weight-bounded greedy block packing.
//!
//! Consumes transactions in effective-fee order and fills projected blocks
//! up to the consensus weight limit. The last permitted block absorbs
//! everything that did not fit earlier, however heavy it gets.

use tracing::trace;

use crate::config::ProjectionConfig;
use crate::stats::{effective_fee_statistics, strip_transaction};
use crate::types::{BlockPosition, Mempool, MempoolBlockWithTransactions, Txid};

/// Partitions `order` into projected blocks and writes each transaction's
/// mid-point `position` back into the mempool. `order` must already be
/// sorted by descending effective fee rate (txid-ascending tie-break).
pub fn pack_blocks(
    order: &[Txid],
    mempool: &mut Mempool,
    config: &ProjectionConfig,
) -> Vec<MempoolBlockWithTransactions> {
    let mut blocks: Vec<Vec<Txid>> = Vec::new();
    let mut current: Vec<Txid> = Vec::new();
    let mut block_weight: u64 = 0;
    let mut block_vsize: f64 = 0.0;

    for txid in order {
        let Some(tx) = mempool.get(txid) else {
            continue;
        };
        let weight = tx.weight;
        let vsize = tx.vsize();
        let last_block = blocks.len() + 1 == config.mempool_blocks_amount;

        if block_weight + weight <= config.block_weight_units || last_block {
            set_position(mempool, txid, blocks.len(), block_vsize + vsize / 2.0);
            block_weight += weight;
            block_vsize += vsize;
            current.push(*txid);
        } else {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            set_position(mempool, txid, blocks.len(), vsize / 2.0);
            block_weight = weight;
            block_vsize = vsize;
            current.push(*txid);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }

    trace!(blocks = blocks.len(), txs = order.len(), "packed projection");

    blocks
        .iter()
        .map(|ids| data_to_mempool_blocks(ids, mempool, config))
        .collect()
}

fn set_position(mempool: &mut Mempool, txid: &Txid, block: usize, vsize: f64) {
    if let Some(tx) = mempool.get_mut(txid) {
        tx.position = Some(BlockPosition { block, vsize });
    }
}

/// Builds the summary for one packed block. The statistics cover every
/// packed transaction; the stripped client subset stops at the relaxed
/// weight cap. The running weight is bumped before the cap comparison, so
/// the retained set is one transaction-weight tighter than the cap name
/// suggests (kept as-is for output compatibility).
pub fn data_to_mempool_blocks(
    block_txids: &[Txid],
    mempool: &Mempool,
    config: &ProjectionConfig,
) -> MempoolBlockWithTransactions {
    let relaxed_cap = config.relaxed_weight_cap();

    let mut block_size: u64 = 0;
    let mut block_vsize: f64 = 0.0;
    let mut total_fees: u64 = 0;
    let mut n_tx: usize = 0;
    let mut rates: Vec<f64> = Vec::with_capacity(block_txids.len());
    let mut total_weight: u64 = 0;
    let mut transactions = Vec::new();

    for txid in block_txids {
        let Some(tx) = mempool.get(txid) else {
            continue;
        };
        block_size += tx.size;
        block_vsize += tx.vsize();
        total_fees += tx.fee;
        n_tx += 1;
        rates.push(tx.effective_fee_per_vsize);

        total_weight += tx.weight;
        if (total_weight + tx.weight) as f64 <= relaxed_cap {
            transactions.push(strip_transaction(tx));
        }
    }

    let stats = effective_fee_statistics(&rates, config);

    MempoolBlockWithTransactions {
        block_size,
        block_vsize,
        n_tx,
        total_fees,
        median_fee: stats.median_fee,
        fee_range: stats.fee_range,
        transaction_ids: block_txids.to_vec(),
        transactions,
    }
}
