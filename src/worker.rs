//! Background template-builder worker.
//!
//! The builder runs on its own named OS thread and owns its mempool mirror
//! outright: nothing is shared, every request ships stripped transactions by
//! value and gets exactly one reply. The handle enforces the one-outstanding-
//! request protocol by awaiting each reply before returning; any breakage of
//! either channel side is reported as a worker failure so the orchestrator
//! can drop the handle and re-spawn lazily.

use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::config::ProjectionConfig;
use crate::error::ProjectionError;
use crate::template::{TemplateBuilder, TemplateResult};
use crate::types::{ThreadTransaction, Txid};

/// Requests understood by the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerMessage {
    /// Replace the worker's entire mempool mirror.
    Set {
        mempool: HashMap<Txid, ThreadTransaction>,
    },
    /// Apply an incremental diff to the mirror.
    Update {
        added: Vec<ThreadTransaction>,
        removed: Vec<Txid>,
    },
}

struct WorkerRequest {
    message: WorkerMessage,
    reply: oneshot::Sender<TemplateResult>,
}

/// Owned handle to a running worker thread. Dropping the handle closes the
/// request channel and lets the thread exit.
pub struct TemplateWorker {
    sender: mpsc::Sender<WorkerRequest>,
}

impl TemplateWorker {
    /// Spawns a fresh worker with an empty mirror.
    pub fn spawn(config: &ProjectionConfig) -> Result<Self, ProjectionError> {
        let (sender, receiver) = mpsc::channel::<WorkerRequest>();
        let block_weight_units = config.block_weight_units;
        let mempool_blocks_amount = config.mempool_blocks_amount;
        let _detached = thread::Builder::new()
            .name("block-templates".to_string())
            .spawn(move || worker_loop(receiver, block_weight_units, mempool_blocks_amount))?;
        info!("spawned template worker");
        Ok(Self { sender })
    }

    /// Handle whose worker thread is already gone; every request fails.
    #[cfg(test)]
    pub(crate) fn disconnected() -> Self {
        let (sender, _receiver) = mpsc::channel();
        Self { sender }
    }

    /// Posts one message and awaits its reply.
    pub async fn request(&self, message: WorkerMessage) -> Result<TemplateResult, ProjectionError> {
        let (reply, receiver) = oneshot::channel();
        self.sender
            .send(WorkerRequest { message, reply })
            .map_err(|_| ProjectionError::WorkerFailed("request channel closed".to_string()))?;
        receiver
            .await
            .map_err(|_| ProjectionError::WorkerFailed("worker dropped the reply".to_string()))
    }
}

fn worker_loop(
    receiver: mpsc::Receiver<WorkerRequest>,
    block_weight_units: u64,
    mempool_blocks_amount: usize,
) {
    let mut builder = TemplateBuilder::new(block_weight_units, mempool_blocks_amount);

    while let Ok(request) = receiver.recv() {
        match request.message {
            WorkerMessage::Set { mempool } => {
                debug!(txs = mempool.len(), "template worker: set mempool");
                builder.set_mempool(mempool);
            }
            WorkerMessage::Update { added, removed } => {
                debug!(
                    added = added.len(),
                    removed = removed.len(),
                    "template worker: update mempool"
                );
                builder.apply_update(added, &removed);
            }
        }
        let result = builder.make_templates();
        if request.reply.send(result).is_err() {
            debug!("template worker: requester went away before the reply");
        }
    }
    debug!("template worker: request channel closed, exiting");
}
