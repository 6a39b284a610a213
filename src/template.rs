//! Worker-side block template construction.
//!
//! Owns a stripped mirror of the mempool and performs ancestor-package
//! selection: every candidate is scored by the fee rate of the package it
//! would have to bring along (itself plus all unselected in-pool ancestors),
//! the best package lands next, and affected descendants are re-scored. This
//! is the higher-quality counterpart of the synchronous fast path and is the
//! only producer of CPFP cluster exports.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{TemplateTransaction, ThreadTransaction, Txid};

/// One template build: projected blocks in packing order plus the CPFP
/// clusters selected along the way, keyed by cluster root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateResult {
    pub blocks: Vec<Vec<TemplateTransaction>>,
    /// Cluster members in inclusion order: ancestors first, root last.
    pub clusters: HashMap<Txid, Vec<Txid>>,
}

/// Heap entry; the heap pops the highest score, ties broken by ascending
/// txid.
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    score: f64,
    txid: Txid,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.txid.cmp(&self.txid))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Mirror of the mempool plus the packing parameters, as held by the
/// template worker thread.
pub struct TemplateBuilder {
    pool: HashMap<Txid, ThreadTransaction>,
    block_weight_units: u64,
    mempool_blocks_amount: usize,
}

impl TemplateBuilder {
    pub fn new(block_weight_units: u64, mempool_blocks_amount: usize) -> Self {
        Self {
            pool: HashMap::new(),
            block_weight_units,
            mempool_blocks_amount,
        }
    }

    /// Replaces the entire mirror.
    pub fn set_mempool(&mut self, mempool: HashMap<Txid, ThreadTransaction>) {
        self.pool = mempool;
    }

    /// Applies an incremental diff to the mirror.
    pub fn apply_update(&mut self, added: Vec<ThreadTransaction>, removed: &[Txid]) {
        for txid in removed {
            self.pool.remove(txid);
        }
        for tx in added {
            self.pool.insert(tx.txid, tx);
        }
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Projects the mirror into blocks.
    pub fn make_templates(&self) -> TemplateResult {
        let mut ancestor_sets: HashMap<Txid, HashSet<Txid>> = self
            .pool
            .keys()
            .map(|txid| (*txid, self.ancestor_closure(txid)))
            .collect();

        // Reverse index: which transactions have `txid` in their closure.
        let mut dependents: HashMap<Txid, Vec<Txid>> = HashMap::new();
        for (txid, ancestors) in &ancestor_sets {
            for ancestor in ancestors {
                dependents.entry(*ancestor).or_default().push(*txid);
            }
        }

        let mut heap: BinaryHeap<Candidate> = self
            .pool
            .keys()
            .map(|txid| Candidate {
                score: self.package_rate(txid, &ancestor_sets[txid]),
                txid: *txid,
            })
            .collect();

        let mut selected: HashSet<Txid> = HashSet::new();
        let mut blocks: Vec<Vec<TemplateTransaction>> = Vec::new();
        let mut current: Vec<TemplateTransaction> = Vec::new();
        let mut current_weight: u64 = 0;
        let mut clusters: HashMap<Txid, Vec<Txid>> = HashMap::new();
        let mut overflow: Vec<Txid> = Vec::new();

        loop {
            while let Some(candidate) = heap.pop() {
                if selected.contains(&candidate.txid) {
                    continue;
                }
                // Lazy revalidation: scores drift as packages land, so a
                // popped entry is only trusted if it still matches.
                let score = self.package_rate(&candidate.txid, &ancestor_sets[&candidate.txid]);
                if score != candidate.score {
                    heap.push(Candidate {
                        score,
                        txid: candidate.txid,
                    });
                    continue;
                }

                // The package: unselected ancestors in dependency order,
                // the candidate last.
                let mut package: Vec<Txid> = ancestor_sets[&candidate.txid]
                    .iter()
                    .filter(|txid| !selected.contains(*txid))
                    .copied()
                    .collect();
                package.sort_by(|a, b| {
                    ancestor_sets[a]
                        .len()
                        .cmp(&ancestor_sets[b].len())
                        .then_with(|| a.cmp(b))
                });
                package.push(candidate.txid);

                let package_weight: u64 =
                    package.iter().map(|txid| self.pool[txid].weight).sum();
                let fits = current_weight + package_weight <= self.block_weight_units;
                let last_block = blocks.len() + 1 == self.mempool_blocks_amount;
                if !fits && !last_block && !current.is_empty() {
                    overflow.push(candidate.txid);
                    continue;
                }

                let package_fee: u64 = package.iter().map(|txid| self.pool[txid].fee).sum();
                let package_rate = package_fee as f64 / (package_weight as f64 / 4.0);
                let is_cluster = package.len() > 1;

                for member in &package {
                    let tx = &self.pool[member];
                    let rate = if !is_cluster {
                        tx.fee_per_vsize
                    } else if *member == candidate.txid {
                        package_rate
                    } else {
                        tx.fee_per_vsize.max(package_rate)
                    };
                    current.push(TemplateTransaction {
                        txid: *member,
                        effective_fee_per_vsize: Some(rate),
                        cpfp_root: if is_cluster {
                            Some(candidate.txid)
                        } else {
                            None
                        },
                        cpfp_checked: true,
                    });
                    selected.insert(*member);
                }
                if is_cluster {
                    clusters.insert(candidate.txid, package.clone());
                }
                current_weight += package_weight;

                // Landed ancestors no longer burden their descendants.
                for member in &package {
                    let Some(children) = dependents.get(member) else {
                        continue;
                    };
                    for child in children {
                        if selected.contains(child) {
                            continue;
                        }
                        if let Some(set) = ancestor_sets.get_mut(child) {
                            if set.remove(member) {
                                heap.push(Candidate {
                                    score: self.package_rate(child, set),
                                    txid: *child,
                                });
                            }
                        }
                    }
                }
            }

            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            current_weight = 0;
            if overflow.is_empty() {
                break;
            }
            for txid in overflow.drain(..) {
                if !selected.contains(&txid) {
                    heap.push(Candidate {
                        score: self.package_rate(&txid, &ancestor_sets[&txid]),
                        txid,
                    });
                }
            }
        }

        debug!(
            txs = self.pool.len(),
            blocks = blocks.len(),
            clusters = clusters.len(),
            "built block templates"
        );

        TemplateResult { blocks, clusters }
    }

    /// In-pool ancestor closure of `txid`.
    fn ancestor_closure(&self, txid: &Txid) -> HashSet<Txid> {
        let mut closure = HashSet::new();
        let mut queue: VecDeque<Txid> = VecDeque::new();
        if let Some(tx) = self.pool.get(txid) {
            for parent in &tx.vin {
                if *parent != *txid && self.pool.contains_key(parent) && closure.insert(*parent) {
                    queue.push_back(*parent);
                }
            }
        }
        while let Some(current) = queue.pop_front() {
            if let Some(tx) = self.pool.get(&current) {
                for parent in &tx.vin {
                    if *parent != *txid && self.pool.contains_key(parent) && closure.insert(*parent)
                    {
                        queue.push_back(*parent);
                    }
                }
            }
        }
        closure
    }

    /// Fee rate of `txid` packaged with the given ancestor set.
    fn package_rate(&self, txid: &Txid, ancestors: &HashSet<Txid>) -> f64 {
        let tx = &self.pool[txid];
        let mut fee = tx.fee;
        let mut weight = tx.weight;
        for ancestor in ancestors {
            let anc = &self.pool[ancestor];
            fee += anc.fee;
            weight += anc.weight;
        }
        fee as f64 / (weight as f64 / 4.0)
    }
}
