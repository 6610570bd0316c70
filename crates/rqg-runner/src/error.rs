//! Runner-level failures that abort a run.

use crate::checkpoint::CheckpointError;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The endpoint stayed unreachable after every reconnect attempt.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    /// The run was cancelled by a stop signal.
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
