//! Orchestrator for projected mempool blocks.
//!
//! Holds exactly one published projection (blocks plus the deltas that led
//! to it) and two ways of refreshing it: the synchronous fast path (CPFP
//! resolution and greedy packing on the caller's thread) and the template
//! path (the background worker's package-aware selection, enriched with
//! cluster data on return). Whichever path runs, its output is diffed
//! against the last published projection before replacing it.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tracing::{debug, warn};

use crate::config::ProjectionConfig;
use crate::deltas::compute_deltas;
use crate::error::ProjectionError;
use crate::fees::RecommendedFees;
use crate::packer::{data_to_mempool_blocks, pack_blocks};
use crate::relatives::{apply_cpfp_patch, set_relatives_and_get_cpfp_info};
use crate::template::TemplateResult;
use crate::types::{
    BlockPosition, Mempool, MempoolBlock, MempoolBlockDelta, MempoolBlockWithTransactions,
    TemplateTransaction, ThreadTransaction, TxSummary, Txid,
};
use crate::worker::{TemplateWorker, WorkerMessage};

#[derive(Default)]
struct Snapshot {
    blocks: Vec<MempoolBlockWithTransactions>,
    deltas: Vec<MempoolBlockDelta>,
}

/// The projection engine's public face. One instance per mempool; the
/// ingestion driver is expected to serialize its projection calls.
pub struct MempoolBlockProjector {
    config: ProjectionConfig,
    snapshot: RwLock<Snapshot>,
    worker: Option<TemplateWorker>,
    stale_drops: AtomicU64,
}

impl MempoolBlockProjector {
    pub fn new(config: ProjectionConfig) -> Self {
        Self {
            config,
            snapshot: RwLock::new(Snapshot::default()),
            worker: None,
            stale_drops: AtomicU64::new(0),
        }
    }

    /// Published block summaries.
    pub fn mempool_blocks(&self) -> Vec<MempoolBlock> {
        let snapshot = self.snapshot.read().unwrap();
        snapshot.blocks.iter().map(|block| block.summary()).collect()
    }

    /// Published blocks with their packing orders and client subsets.
    pub fn mempool_blocks_with_transactions(&self) -> Vec<MempoolBlockWithTransactions> {
        self.snapshot.read().unwrap().blocks.clone()
    }

    /// Deltas between the previous projection and the published one.
    pub fn mempool_block_deltas(&self) -> Vec<MempoolBlockDelta> {
        self.snapshot.read().unwrap().deltas.clone()
    }

    /// Blocks and deltas from the same generation, for readers that need
    /// both without racing a publish in between.
    pub fn projection_snapshot(
        &self,
    ) -> (Vec<MempoolBlockWithTransactions>, Vec<MempoolBlockDelta>) {
        let snapshot = self.snapshot.read().unwrap();
        (snapshot.blocks.clone(), snapshot.deltas.clone())
    }

    /// Cumulative count of worker-result transactions dropped because they
    /// had left the mempool by reply time.
    pub fn stale_drop_count(&self) -> u64 {
        self.stale_drops.load(Ordering::Relaxed)
    }

    /// Fee recommendations derived from the published projection.
    pub fn recommended_fees(&self) -> RecommendedFees {
        RecommendedFees::from_blocks(&self.mempool_blocks())
    }

    /// Synchronous fast path: resolve CPFP relatives in fee order, re-sort
    /// by effective rate, pack. Mutates the CPFP and position fields of the
    /// mempool records as a side effect.
    pub fn update_mempool_blocks(
        &self,
        mempool: &mut Mempool,
        save_results: bool,
    ) -> Vec<MempoolBlockWithTransactions> {
        let mut order: Vec<Txid> = mempool
            .values()
            .filter(|tx| tx.delete_after.is_none())
            .map(|tx| tx.txid)
            .collect();

        sort_by_rate_desc(&mut order, |txid| mempool[txid].fee_per_vsize);

        // Resolve relatives until the mempool depth no miner will reach;
        // everything past the cap keeps its own fee rate.
        let cap = self.config.resolution_weight_cap();
        let mut running_weight: u64 = 0;
        for txid in &order {
            let (weight, checked) = {
                let tx = &mempool[txid];
                (tx.weight, tx.cpfp_checked)
            };
            running_weight += weight;
            if running_weight > cap || checked {
                continue;
            }
            if let Some(patch) = set_relatives_and_get_cpfp_info(txid, mempool) {
                apply_cpfp_patch(mempool, patch);
            }
        }

        sort_by_rate_desc(&mut order, |txid| mempool[txid].effective_fee_per_vsize);

        let blocks = pack_blocks(&order, mempool, &self.config);
        debug!(
            txs = order.len(),
            blocks = blocks.len(),
            "fast-path projection complete"
        );
        self.publish(blocks, save_results)
    }

    /// Full worker rebuild: ship the whole mempool, await the reply, enrich
    /// and publish. A worker failure leaves the published projection
    /// untouched and is repaired by the next call.
    pub async fn make_block_templates(
        &mut self,
        mempool: &mut Mempool,
        save_results: bool,
    ) -> Vec<MempoolBlockWithTransactions> {
        let stripped: HashMap<Txid, ThreadTransaction> = mempool
            .values()
            .filter(|tx| tx.delete_after.is_none())
            .map(|tx| (tx.txid, ThreadTransaction::from(tx)))
            .collect();

        match self.template_request(WorkerMessage::Set { mempool: stripped }).await {
            Ok(result) => self.apply_template_result(result, mempool, save_results),
            Err(error) => {
                warn!(%error, "full template build failed, serving last projection");
                self.mempool_blocks_with_transactions()
            }
        }
    }

    /// Incremental worker update. Without a live worker this degrades to a
    /// full rebuild, which re-spawns one.
    pub async fn update_block_templates(
        &mut self,
        mempool: &mut Mempool,
        added: &[Txid],
        removed: &[Txid],
        save_results: bool,
    ) {
        if self.worker.is_none() {
            debug!("no live template worker, falling back to a full rebuild");
            self.make_block_templates(mempool, save_results).await;
            return;
        }

        let added: Vec<ThreadTransaction> = added
            .iter()
            .filter_map(|txid| mempool.get(txid))
            .filter(|tx| tx.delete_after.is_none())
            .map(ThreadTransaction::from)
            .collect();
        let message = WorkerMessage::Update {
            added,
            removed: removed.to_vec(),
        };

        match self.template_request(message).await {
            Ok(result) => {
                self.apply_template_result(result, mempool, save_results);
            }
            Err(error) => {
                warn!(%error, "incremental template update failed, serving last projection");
            }
        }
    }

    /// Sends one request, lazily spawning the worker. Any failure drops the
    /// handle so the next call starts from a fresh full `set`.
    async fn template_request(
        &mut self,
        message: WorkerMessage,
    ) -> Result<TemplateResult, ProjectionError> {
        if self.worker.is_none() {
            self.worker = Some(TemplateWorker::spawn(&self.config)?);
        }
        let Some(worker) = self.worker.as_ref() else {
            return Err(ProjectionError::WorkerUnavailable);
        };
        match worker.request(message).await {
            Ok(result) => Ok(result),
            Err(error) => {
                self.worker = None;
                Err(error)
            }
        }
    }

    /// Filters stale entries out of a worker result, copies positions,
    /// effective rates and cluster relatives into the live mempool, and
    /// publishes the finished projection.
    fn apply_template_result(
        &self,
        result: TemplateResult,
        mempool: &mut Mempool,
        save_results: bool,
    ) -> Vec<MempoolBlockWithTransactions> {
        // The reply raced the live mempool; keep only what still exists.
        let mut dropped: u64 = 0;
        let blocks: Vec<Vec<TemplateTransaction>> = result
            .blocks
            .into_iter()
            .map(|block| {
                block
                    .into_iter()
                    .filter(|tx| {
                        let live = mempool.contains_key(&tx.txid);
                        if !live {
                            dropped += 1;
                        }
                        live
                    })
                    .collect()
            })
            .collect();
        if dropped > 0 {
            self.stale_drops.fetch_add(dropped, Ordering::Relaxed);
            warn!(
                dropped,
                "dropped template transactions no longer in the mempool"
            );
        }

        for (block_index, block) in blocks.iter().enumerate() {
            let mut running_vsize: f64 = 0.0;
            for template_tx in block {
                let relatives = template_tx
                    .cpfp_root
                    .as_ref()
                    .and_then(|root| result.clusters.get(root))
                    .map(|cluster| split_cluster(cluster, &template_tx.txid, mempool));

                let Some(tx) = mempool.get_mut(&template_tx.txid) else {
                    continue;
                };
                let vsize = tx.weight as f64 / 4.0;
                tx.position = Some(BlockPosition {
                    block: block_index,
                    vsize: running_vsize + vsize / 2.0,
                });
                running_vsize += vsize;
                if let Some(rate) = template_tx.effective_fee_per_vsize {
                    tx.effective_fee_per_vsize = rate;
                }
                if let Some((ancestors, descendants)) = relatives {
                    tx.ancestors = ancestors;
                    tx.descendants = descendants;
                    tx.best_descendant = None;
                }
                tx.cpfp_checked = template_tx.cpfp_checked;
            }
        }

        let final_blocks: Vec<MempoolBlockWithTransactions> = blocks
            .iter()
            .map(|block| {
                let ids: Vec<Txid> = block.iter().map(|tx| tx.txid).collect();
                data_to_mempool_blocks(&ids, mempool, &self.config)
            })
            .collect();
        self.publish(final_blocks, save_results)
    }

    /// Atomically replaces the published projection (and its deltas) when
    /// asked to; always returns the fresh blocks.
    fn publish(
        &self,
        blocks: Vec<MempoolBlockWithTransactions>,
        save_results: bool,
    ) -> Vec<MempoolBlockWithTransactions> {
        if save_results {
            let mut snapshot = self.snapshot.write().unwrap();
            snapshot.deltas = compute_deltas(&snapshot.blocks, &blocks);
            snapshot.blocks = blocks.clone();
        }
        blocks
    }
}

fn sort_by_rate_desc(order: &mut [Txid], rate_of: impl Fn(&Txid) -> f64) {
    order.sort_by(|a, b| {
        rate_of(b)
            .partial_cmp(&rate_of(a))
            .unwrap_or(CmpOrdering::Equal)
            .then_with(|| a.cmp(b))
    });
}

/// Splits a cluster member list into the relatives of `pivot`: everything
/// before the pivot becomes its ancestors, everything after its
/// descendants. Members missing from the live mempool are skipped.
fn split_cluster(
    cluster: &[Txid],
    pivot: &Txid,
    mempool: &Mempool,
) -> (Vec<TxSummary>, Vec<TxSummary>) {
    let mut ancestors = Vec::new();
    let mut descendants = Vec::new();
    let mut after_pivot = false;
    for member in cluster {
        if member == pivot {
            after_pivot = true;
            continue;
        }
        let Some(tx) = mempool.get(member) else {
            warn!(txid = %member, "cluster member missing from the mempool, skipping");
            continue;
        };
        if after_pivot {
            descendants.push(tx.summary());
        } else {
            ancestors.push(tx.summary());
        }
    }
    (ancestors, descendants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MempoolTransaction;

    fn txid(byte: u8) -> Txid {
        Txid::new([byte; 32])
    }

    fn insert(mempool: &mut Mempool, byte: u8, fee: u64, weight: u64, vin: Vec<Txid>) {
        let id = txid(byte);
        mempool.insert(id, MempoolTransaction::new(id, fee, weight, weight / 4, vin));
    }

    #[test]
    fn test_fast_path_single_transaction() {
        let projector = MempoolBlockProjector::new(ProjectionConfig::default());
        let mut mempool = Mempool::new();
        insert(&mut mempool, 1, 1000, 400, vec![]);

        let blocks = projector.update_mempool_blocks(&mut mempool, true);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].n_tx, 1);
        assert_eq!(blocks[0].block_vsize, 100.0);
        assert_eq!(blocks[0].total_fees, 1000);
        let position = mempool[&txid(1)].position.unwrap();
        assert_eq!(position.block, 0);
        assert_eq!(position.vsize, 50.0);

        // Published snapshot matches what the call returned.
        let summaries = projector.mempool_blocks();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].total_fees, 1000);
        let deltas = projector.mempool_block_deltas();
        assert_eq!(deltas[0].added.len(), 1);

        // 10 s/vB median everywhere with a one-block projection.
        let fees = projector.recommended_fees();
        assert_eq!(fees.fastest_fee, 10);
        assert_eq!(fees.economy_fee, 10);
        assert_eq!(fees.minimum_fee, 1);
    }

    #[test]
    fn test_fast_path_cpfp_lift() {
        let projector = MempoolBlockProjector::new(ProjectionConfig::default());
        let mut mempool = Mempool::new();
        insert(&mut mempool, 1, 0, 400, vec![]);
        insert(&mut mempool, 2, 2000, 400, vec![txid(1)]);

        let blocks = projector.update_mempool_blocks(&mut mempool, false);

        assert_eq!(mempool[&txid(1)].effective_fee_per_vsize, 10.0);
        assert_eq!(mempool[&txid(2)].effective_fee_per_vsize, 10.0);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].n_tx, 2);
        assert_eq!(mempool[&txid(1)].position.unwrap().block, 0);
        assert_eq!(mempool[&txid(2)].position.unwrap().block, 0);
    }

    #[test]
    fn test_fast_path_skips_tombstoned() {
        let projector = MempoolBlockProjector::new(ProjectionConfig::default());
        let mut mempool = Mempool::new();
        insert(&mut mempool, 1, 1000, 400, vec![]);
        insert(&mut mempool, 2, 2000, 400, vec![]);
        mempool.get_mut(&txid(2)).unwrap().delete_after = Some(12345);

        let blocks = projector.update_mempool_blocks(&mut mempool, false);

        assert_eq!(blocks[0].transaction_ids, vec![txid(1)]);
    }

    #[test]
    fn test_fast_path_resolution_stops_at_weight_cap() {
        let config = ProjectionConfig {
            block_weight_units: 4_000,
            mempool_blocks_amount: 1,
            ..ProjectionConfig::default()
        };
        let projector = MempoolBlockProjector::new(config);
        let mut mempool = Mempool::new();
        // Two 4000-WU transactions: the second exceeds the 4000-WU
        // resolution cap and keeps its own rate, unresolved.
        insert(&mut mempool, 1, 2000, 4_000, vec![]);
        insert(&mut mempool, 2, 1000, 4_000, vec![]);

        projector.update_mempool_blocks(&mut mempool, false);

        assert!(mempool[&txid(1)].cpfp_checked);
        assert!(!mempool[&txid(2)].cpfp_checked);
    }

    #[test]
    fn test_fast_path_rate_change_delta() {
        let projector = MempoolBlockProjector::new(ProjectionConfig::default());
        let mut mempool = Mempool::new();
        insert(&mut mempool, 1, 500, 400, vec![]);
        projector.update_mempool_blocks(&mut mempool, true);

        // A new child lifts the rate of tx 1 between snapshots.
        insert(&mut mempool, 2, 2000, 400, vec![txid(1)]);
        mempool.get_mut(&txid(1)).unwrap().cpfp_checked = false;
        projector.update_mempool_blocks(&mut mempool, true);

        let deltas = projector.mempool_block_deltas();
        assert_eq!(deltas[0].added.len(), 1);
        let changed: Vec<Txid> = deltas[0].changed.iter().map(|c| c.txid).collect();
        assert_eq!(changed, vec![txid(1)]);
    }

    #[test]
    fn test_empty_mempool_projects_nothing() {
        let projector = MempoolBlockProjector::new(ProjectionConfig::default());
        let mut mempool = Mempool::new();
        let blocks = projector.update_mempool_blocks(&mut mempool, true);
        assert!(blocks.is_empty());
        assert!(projector.mempool_blocks().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_template_path_enriches_mempool() {
        let mut projector = MempoolBlockProjector::new(ProjectionConfig::default());
        let mut mempool = Mempool::new();
        insert(&mut mempool, 1, 0, 400, vec![]);
        insert(&mut mempool, 2, 2000, 400, vec![txid(1)]);

        let blocks = projector.make_block_templates(&mut mempool, true).await;

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].transaction_ids, vec![txid(1), txid(2)]);

        let parent = &mempool[&txid(1)];
        assert_eq!(parent.position.unwrap().vsize, 50.0);
        assert_eq!(parent.effective_fee_per_vsize, 10.0);
        assert_eq!(parent.descendants.len(), 1);
        assert_eq!(parent.descendants[0].txid, txid(2));
        assert!(parent.ancestors.is_empty());
        assert!(parent.best_descendant.is_none());
        assert!(parent.cpfp_checked);

        let child = &mempool[&txid(2)];
        assert_eq!(child.position.unwrap().vsize, 150.0);
        assert_eq!(child.ancestors.len(), 1);
        assert_eq!(child.ancestors[0].txid, txid(1));
        assert!(child.descendants.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_template_path_filters_stale_transactions() {
        let mut projector = MempoolBlockProjector::new(ProjectionConfig::default());
        let mut mempool = Mempool::new();
        insert(&mut mempool, 1, 1000, 400, vec![]);
        insert(&mut mempool, 2, 2000, 400, vec![]);

        projector.make_block_templates(&mut mempool, true).await;
        assert_eq!(projector.stale_drop_count(), 0);

        // Tx 2 leaves the live mempool but the worker mirror still has it:
        // the next reply must be filtered.
        mempool.remove(&txid(2));
        projector
            .update_block_templates(&mut mempool, &[], &[], true)
            .await;

        assert_eq!(projector.stale_drop_count(), 1);
        let blocks = projector.mempool_blocks_with_transactions();
        assert_eq!(blocks[0].transaction_ids, vec![txid(1)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_worker_failure_serves_last_projection_then_rebuilds() {
        let mut projector = MempoolBlockProjector::new(ProjectionConfig::default());
        let mut mempool = Mempool::new();
        insert(&mut mempool, 1, 1000, 400, vec![]);

        projector.make_block_templates(&mut mempool, true).await;
        assert_eq!(projector.mempool_blocks().len(), 1);

        // Replace the worker with one whose thread is gone.
        projector.worker = Some(TemplateWorker::disconnected());
        insert(&mut mempool, 2, 2000, 400, vec![]);
        projector
            .update_block_templates(&mut mempool, &[txid(2)], &[], true)
            .await;

        // The failed call nulled the handle and left the projection alone.
        assert!(projector.worker.is_none());
        assert_eq!(projector.mempool_blocks()[0].n_tx, 1);

        // The next incremental call degrades to a full rebuild.
        projector
            .update_block_templates(&mut mempool, &[txid(2)], &[], true)
            .await;
        assert!(projector.worker.is_some());
        assert_eq!(projector.mempool_blocks()[0].n_tx, 2);
    }
}
