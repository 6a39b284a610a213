//! Fast-path CPFP resolution.
//!
//! Walks the unconfirmed ancestor closure of a transaction, offers the
//! transaction to each ancestor as a fee-bumping best descendant, and
//! recomputes the transaction's effective fee rate as a package rate. The
//! resolver is a pure function returning a patch; the caller applies patches
//! to the mempool map between calls, so a failed or abandoned run never
//! leaves records half-updated.
//!
//! Package membership is asymmetric. A needy (lower-rate) parent drags its
//! descendant's effective rate down, because the descendant cannot confirm
//! without it. A high-rate parent does not lift its descendant, because the
//! parent confirming does nothing for the child. Lift flows upward through
//! `best_descendant`: once a transaction has been offered a better-paying
//! descendant chain, its own resolution folds that chain into its package.

use std::collections::{HashSet, VecDeque};

use tracing::trace;

use crate::types::{Mempool, TxSummary, Txid};

/// Everything one resolver call wants written back into the mempool.
#[derive(Debug, Clone)]
pub struct CpfpPatch {
    pub txid: Txid,
    /// Full in-mempool ancestor closure of the transaction.
    pub ancestors: Vec<TxSummary>,
    /// Package fee rate over the transaction, its lower-rate ancestors, and
    /// its best descendant chain.
    pub effective_fee_per_vsize: f64,
    /// `best_descendant` updates for ancestors this transaction improves.
    pub best_descendants: Vec<(Txid, TxSummary)>,
}

/// Resolves the CPFP relatives of `txid` against the current mempool.
///
/// Returns `None` when the transaction is not in the map. Inputs whose
/// funding transaction is absent are skipped: those parents are confirmed
/// or unknown, either way not part of the unconfirmed package.
pub fn set_relatives_and_get_cpfp_info(txid: &Txid, mempool: &Mempool) -> Option<CpfpPatch> {
    let tx = mempool.get(txid)?;

    // Worklist walk over vin-reachable in-pool parents. The seen set is
    // extended before a parent is queued, so even a malformed cyclic input
    // set terminates.
    let mut ancestors: Vec<TxSummary> = Vec::new();
    let mut seen: HashSet<Txid> = HashSet::new();
    seen.insert(*txid);
    let mut queue: VecDeque<Txid> = VecDeque::new();
    for parent in &tx.vin {
        if mempool.contains_key(parent) && seen.insert(*parent) {
            queue.push_back(*parent);
        }
    }
    while let Some(current) = queue.pop_front() {
        let Some(parent) = mempool.get(&current) else {
            continue;
        };
        ancestors.push(parent.summary());
        for grandparent in &parent.vin {
            if mempool.contains_key(grandparent) && seen.insert(*grandparent) {
                queue.push_back(*grandparent);
            }
        }
    }

    // Package rate: the transaction, every ancestor it has to pay for, and
    // the best descendant chain already offered to it.
    let mut package_fee = tx.fee;
    let mut package_weight = tx.weight;
    for ancestor in &ancestors {
        if ancestor.fee_per_vsize() < tx.effective_fee_per_vsize {
            package_fee += ancestor.fee;
            package_weight += ancestor.weight;
        }
    }
    if let Some(best) = &tx.best_descendant {
        package_fee += best.fee;
        package_weight += best.weight;
    }
    let effective_fee_per_vsize = package_fee as f64 / (package_weight as f64 / 4.0);

    // The candidate offered to each ancestor: this transaction alone, or the
    // aggregate of this transaction plus its own best descendant chain when
    // that chain out-pays it.
    let candidate = match &tx.best_descendant {
        Some(best) if best.fee_per_vsize() > tx.fee_per_vsize => TxSummary {
            txid: tx.txid,
            fee: tx.fee + best.fee,
            weight: tx.weight + best.weight,
        },
        _ => tx.summary(),
    };
    let candidate_rate = candidate.fee_per_vsize();

    let mut best_descendants = Vec::new();
    for ancestor in &ancestors {
        if candidate_rate <= ancestor.fee_per_vsize() {
            continue;
        }
        let Some(entry) = mempool.get(&ancestor.txid) else {
            continue;
        };
        let improves = match &entry.best_descendant {
            Some(current) => candidate_rate > current.fee_per_vsize(),
            None => true,
        };
        if improves {
            best_descendants.push((ancestor.txid, candidate.clone()));
        }
    }

    trace!(
        txid = %txid,
        ancestors = ancestors.len(),
        rate = effective_fee_per_vsize,
        "resolved cpfp relatives"
    );

    Some(CpfpPatch {
        txid: *txid,
        ancestors,
        effective_fee_per_vsize,
        best_descendants,
    })
}

/// Writes a resolver patch back into the mempool and marks the transaction
/// resolved.
pub fn apply_cpfp_patch(mempool: &mut Mempool, patch: CpfpPatch) {
    for (ancestor, best) in patch.best_descendants {
        if let Some(entry) = mempool.get_mut(&ancestor) {
            entry.best_descendant = Some(best);
        }
    }
    if let Some(tx) = mempool.get_mut(&patch.txid) {
        tx.ancestors = patch.ancestors;
        tx.effective_fee_per_vsize = patch.effective_fee_per_vsize;
        tx.cpfp_checked = true;
    }
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

    fn resolve(mempool: &mut Mempool, byte: u8) {
        let patch = set_relatives_and_get_cpfp_info(&txid(byte), mempool).unwrap();
        apply_cpfp_patch(mempool, patch);
    }

    #[test]
    fn test_child_and_parent_meet_at_package_rate() {
        // Zero-fee parent, 2000-sat child, 400 WU each: the package pays
        // 2000 sats for 200 vbytes.
        let mut mempool = Mempool::new();
        insert(&mut mempool, 1, 0, 400, vec![]);
        insert(&mut mempool, 2, 2000, 400, vec![txid(1)]);

        resolve(&mut mempool, 2);
        resolve(&mut mempool, 1);

        let child = &mempool[&txid(2)];
        assert_eq!(child.effective_fee_per_vsize, 10.0);
        assert!(child.cpfp_checked);
        assert_eq!(child.ancestors.len(), 1);
        assert_eq!(child.ancestors[0].txid, txid(1));

        let parent = &mempool[&txid(1)];
        assert_eq!(parent.effective_fee_per_vsize, 10.0);
        assert_eq!(parent.best_descendant.as_ref().unwrap().txid, txid(2));
    }

    #[test]
    fn test_high_rate_parent_does_not_lift_child() {
        let mut mempool = Mempool::new();
        insert(&mut mempool, 1, 4000, 400, vec![]);
        insert(&mut mempool, 2, 400, 400, vec![txid(1)]);

        resolve(&mut mempool, 2);

        let child = &mempool[&txid(2)];
        assert_eq!(child.effective_fee_per_vsize, child.fee_per_vsize);
        assert_eq!(child.effective_fee_per_vsize, 4.0);
        // A low-rate child is no bump for the parent either.
        assert!(mempool[&txid(1)].best_descendant.is_none());
    }

    #[test]
    fn test_transitive_ancestors_collected_once() {
        // Diamond: D spends B and C, both spend A. A must be counted once.
        let mut mempool = Mempool::new();
        insert(&mut mempool, 1, 100, 400, vec![]);
        insert(&mut mempool, 2, 100, 400, vec![txid(1)]);
        insert(&mut mempool, 3, 100, 400, vec![txid(1)]);
        insert(&mut mempool, 4, 8000, 400, vec![txid(2), txid(3)]);

        resolve(&mut mempool, 4);

        let tx = &mempool[&txid(4)];
        assert_eq!(tx.ancestors.len(), 3);
        // Package: 8300 sats over 400 vbytes.
        assert_eq!(tx.effective_fee_per_vsize, 8300.0 / 400.0);
    }

    #[test]
    fn test_chain_lift_reaches_grandparent() {
        // G <- P <- C, only C pays. Resolution order mirrors the driver:
        // highest own rate first, then txid ascending.
        let mut mempool = Mempool::new();
        insert(&mut mempool, 1, 0, 400, vec![]);
        insert(&mut mempool, 2, 0, 400, vec![txid(1)]);
        insert(&mut mempool, 3, 3000, 400, vec![txid(2)]);

        resolve(&mut mempool, 3);
        resolve(&mut mempool, 1);
        resolve(&mut mempool, 2);

        // C pays for both needy ancestors.
        assert_eq!(mempool[&txid(3)].effective_fee_per_vsize, 10.0);
        // Both ancestors were offered C and fold it into their packages.
        assert_eq!(mempool[&txid(1)].effective_fee_per_vsize, 15.0);
        assert_eq!(mempool[&txid(2)].effective_fee_per_vsize, 15.0);
        // Lifted ancestors sort ahead of the descendant that paid for them.
        assert!(
            mempool[&txid(1)].effective_fee_per_vsize
                >= mempool[&txid(3)].effective_fee_per_vsize
        );
    }

    #[test]
    fn test_missing_parent_skipped() {
        let mut mempool = Mempool::new();
        insert(&mut mempool, 2, 1000, 400, vec![txid(9)]);

        resolve(&mut mempool, 2);

        let tx = &mempool[&txid(2)];
        assert!(tx.ancestors.is_empty());
        assert_eq!(tx.effective_fee_per_vsize, tx.fee_per_vsize);
    }

    #[test]
    fn test_best_descendant_keeps_higher_rate() {
        let mut mempool = Mempool::new();
        insert(&mut mempool, 1, 0, 400, vec![]);
        insert(&mut mempool, 2, 4000, 400, vec![txid(1)]);
        insert(&mut mempool, 3, 1000, 400, vec![txid(1)]);

        resolve(&mut mempool, 2);
        resolve(&mut mempool, 3);

        // The lower-rate sibling must not displace the higher-rate one.
        let parent = &mempool[&txid(1)];
        assert_eq!(parent.best_descendant.as_ref().unwrap().txid, txid(2));
    }

    #[test]
    fn test_cycle_terminates() {
        let mut mempool = Mempool::new();
        insert(&mut mempool, 1, 100, 400, vec![txid(2)]);
        insert(&mut mempool, 2, 100, 400, vec![txid(1)]);

        let patch = set_relatives_and_get_cpfp_info(&txid(1), &mempool).unwrap();
        assert_eq!(patch.ancestors.len(), 1);
    }
}
