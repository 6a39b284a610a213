//! Mempool block projection engine.
//!
//! Given the current unconfirmed transaction set of a UTXO node, this crate
//! continuously projects what the next several blocks a miner would assemble
//! are likely to contain. Projections honor the consensus weight limit,
//! account for Child-Pays-For-Parent fee bumping across ancestor clusters,
//! and come with per-block deltas so downstream consumers can push compact
//! updates instead of whole snapshots.
//!
//! The entry point is [`MempoolBlockProjector`]: feed it the mempool map and
//! it either projects synchronously on the calling thread
//! ([`MempoolBlockProjector::update_mempool_blocks`]) or defers to a
//! background worker running the package-aware selection
//! ([`MempoolBlockProjector::make_block_templates`] and
//! [`MempoolBlockProjector::update_block_templates`]).

pub mod config;
pub mod deltas;
pub mod error;
pub mod fees;
pub mod packer;
pub mod projector;
pub mod relatives;
pub mod stats;
pub mod template;
pub mod types;
pub mod worker;

pub use crate::config::{ConfigError, ProjectionConfig};
pub use crate::error::ProjectionError;
pub use crate::fees::RecommendedFees;
pub use crate::projector::MempoolBlockProjector;
pub use crate::stats::FeeStatistics;
pub use crate::template::{TemplateBuilder, TemplateResult};
pub use crate::worker::{TemplateWorker, WorkerMessage};
pub use crate::types::{
    BlockPosition, Mempool, MempoolBlock, MempoolBlockDelta, MempoolBlockWithTransactions,
    MempoolTransaction, StrippedTransaction, TemplateTransaction, ThreadTransaction, TxRateChange,
    TxSummary, Txid,
};
