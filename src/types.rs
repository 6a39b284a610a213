//! Core data model for mempool block projection.
//!
//! These types are shared between the synchronous fast path, the template
//! worker, and the public accessors. Everything client-facing derives serde
//! so the broadcast bus and HTTP layers can ship it as JSON unchanged.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The live unconfirmed transaction set, keyed by txid. Owned by the
/// ingestion layer; the projection engine reads it and writes back the
/// CPFP/position fields as a side effect of each projection run.
pub type Mempool = HashMap<Txid, MempoolTransaction>;

/// 32-byte transaction identifier.
///
/// The derived `Ord` compares the raw bytes, which is exactly the
/// lexicographic order of the lowercase-hex form. All deterministic
/// tie-breaks in the engine sort on this.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Txid([u8; 32]);

impl Txid {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txid({})", hex::encode(self.0))
    }
}

#[derive(Debug, Error)]
pub enum TxidParseError {
    #[error("Invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("Expected 32 bytes, got {0}")]
    Length(usize),
}

impl FromStr for Txid {
    type Err = TxidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(TxidParseError::Length(bytes.len()));
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(&bytes);
        Ok(Self(id))
    }
}

impl Serialize for Txid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Txid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Compact `{txid, fee, weight}` record used for ancestor/descendant lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxSummary {
    pub txid: Txid,
    pub fee: u64,
    pub weight: u64,
}

impl TxSummary {
    /// Fee rate in satoshis per virtual byte.
    pub fn fee_per_vsize(&self) -> f64 {
        self.fee as f64 / (self.weight as f64 / 4.0)
    }
}

/// Where a transaction landed in the current projection: block index plus
/// the mid-point vsize offset within that block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockPosition {
    pub block: usize,
    pub vsize: f64,
}

/// A mempool-resident transaction as the projection engine sees it.
///
/// `fee` is in satoshis, `weight` in weight units (4x base bytes plus
/// witness bytes), `size` in serialized bytes. The CPFP fields
/// (`ancestors`, `descendants`, `best_descendant`, `effective_fee_per_vsize`,
/// `cpfp_checked`) and `position` are outputs of the engine; everything else
/// comes from the ingestion layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolTransaction {
    pub txid: Txid,
    pub fee: u64,
    pub weight: u64,
    pub size: u64,
    pub fee_per_vsize: f64,
    pub effective_fee_per_vsize: f64,
    /// Txids of the transactions this one spends from, in input order.
    pub vin: Vec<Txid>,
    #[serde(default)]
    pub ancestors: Vec<TxSummary>,
    #[serde(default)]
    pub descendants: Vec<TxSummary>,
    #[serde(default)]
    pub best_descendant: Option<TxSummary>,
    #[serde(default)]
    pub cpfp_checked: bool,
    #[serde(default)]
    pub position: Option<BlockPosition>,
    /// Tombstone set by the ingestion layer; tombstoned transactions are
    /// excluded from projection inputs.
    #[serde(default)]
    pub delete_after: Option<u64>,
}

impl MempoolTransaction {
    /// Builds a fresh record with the effective rate initialized to the
    /// transaction's own fee rate.
    pub fn new(txid: Txid, fee: u64, weight: u64, size: u64, vin: Vec<Txid>) -> Self {
        let fee_per_vsize = fee as f64 / (weight as f64 / 4.0);
        Self {
            txid,
            fee,
            weight,
            size,
            fee_per_vsize,
            effective_fee_per_vsize: fee_per_vsize,
            vin,
            ancestors: Vec::new(),
            descendants: Vec::new(),
            best_descendant: None,
            cpfp_checked: false,
            position: None,
            delete_after: None,
        }
    }

    /// Virtual size in vbytes. Fractional: weight is not always a multiple
    /// of four.
    pub fn vsize(&self) -> f64 {
        self.weight as f64 / 4.0
    }

    pub fn summary(&self) -> TxSummary {
        TxSummary {
            txid: self.txid,
            fee: self.fee,
            weight: self.weight,
        }
    }
}

/// The stripped form exchanged with the template worker. Only what the
/// selection algorithm needs crosses the channel; the worker never sees the
/// full mempool records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadTransaction {
    pub txid: Txid,
    pub fee: u64,
    pub weight: u64,
    pub fee_per_vsize: f64,
    pub effective_fee_per_vsize: f64,
    pub vin: Vec<Txid>,
}

impl From<&MempoolTransaction> for ThreadTransaction {
    fn from(tx: &MempoolTransaction) -> Self {
        Self {
            txid: tx.txid,
            fee: tx.fee,
            weight: tx.weight,
            fee_per_vsize: tx.fee_per_vsize,
            effective_fee_per_vsize: tx.effective_fee_per_vsize,
            vin: tx.vin.clone(),
        }
    }
}

/// One transaction in a worker-produced template block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateTransaction {
    pub txid: Txid,
    /// Package-aware fee rate computed during selection, if the worker
    /// resolved one.
    pub effective_fee_per_vsize: Option<f64>,
    /// Root txid of the CPFP cluster this transaction was selected with.
    pub cpfp_root: Option<Txid>,
    pub cpfp_checked: bool,
}

/// Client-facing projection of a packed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrippedTransaction {
    pub txid: Txid,
    pub fee: u64,
    pub vsize: f64,
    /// Effective fee rate, present once the transaction has been
    /// CPFP-resolved.
    pub rate: Option<f64>,
}

/// Summary of one projected block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MempoolBlock {
    pub block_size: u64,
    pub block_vsize: f64,
    pub n_tx: usize,
    pub total_fees: u64,
    pub median_fee: f64,
    pub fee_range: Vec<f64>,
}

/// A projected block together with its full packing order and the stripped
/// subset retained for client delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolBlockWithTransactions {
    pub block_size: u64,
    pub block_vsize: f64,
    pub n_tx: usize,
    pub total_fees: u64,
    pub median_fee: f64,
    pub fee_range: Vec<f64>,
    /// Every packed txid, in packing order.
    pub transaction_ids: Vec<Txid>,
    /// The stripped subset under the relaxed client weight cap, in packing
    /// order.
    pub transactions: Vec<StrippedTransaction>,
}

impl MempoolBlockWithTransactions {
    pub fn summary(&self) -> MempoolBlock {
        MempoolBlock {
            block_size: self.block_size,
            block_vsize: self.block_vsize,
            n_tx: self.n_tx,
            total_fees: self.total_fees,
            median_fee: self.median_fee,
            fee_range: self.fee_range.clone(),
        }
    }
}

/// Rate change entry in a block delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRateChange {
    pub txid: Txid,
    pub rate: Option<f64>,
}

/// Per-block-index difference between two successive projections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MempoolBlockDelta {
    pub added: Vec<StrippedTransaction>,
    pub removed: Vec<Txid>,
    pub changed: Vec<TxRateChange>,
}

impl MempoolBlockDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}
