//! Error types for the projection engine.

use thiserror::Error;

/// Failures surfaced by the template worker path. None of these are fatal:
/// the orchestrator logs, drops its worker handle, and serves the last
/// published projection until the next call rebuilds.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Failed to spawn template worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),
    #[error("Template worker is not running")]
    WorkerUnavailable,
    #[error("Template worker failed: {0}")]
    WorkerFailed(String),
}
