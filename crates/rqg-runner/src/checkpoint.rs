//! Atomic run checkpoints for resume support.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Checkpoint file contents.
///
/// `done[w]` is the number of indices worker `w` has completed; on resume,
/// worker `w` skips that many indices of its assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub master_seed: u64,
    pub total: Option<u64>,
    pub workers: u32,
    pub done: Vec<u64>,
    pub started_at: DateTime<Utc>,
    pub schema_fingerprint: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("corrupt checkpoint: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Checkpoint {
    pub fn new(
        master_seed: u64,
        total: Option<u64>,
        workers: u32,
        schema_fingerprint: String,
    ) -> Self {
        Self {
            master_seed,
            total,
            workers,
            done: vec![0; workers as usize],
            started_at: Utc::now(),
            schema_fingerprint,
        }
    }

    /// Read and validate a checkpoint file.
    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let content = std::fs::read_to_string(path)?;
        let checkpoint: Checkpoint = serde_json::from_str(&content)
            .map_err(|e| CheckpointError::Corrupt(e.to_string()))?;
        if checkpoint.done.len() != checkpoint.workers as usize {
            return Err(CheckpointError::Corrupt(format!(
                "{} done entries for {} workers",
                checkpoint.done.len(),
                checkpoint.workers
            )));
        }
        Ok(checkpoint)
    }

    /// Write-to-temp then rename, so a crash never leaves a torn file.
    pub fn write_atomic(&self, path: &Path) -> Result<(), CheckpointError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CheckpointError::Corrupt(e.to_string()))?;
        let mut temp = PathBuf::from(path);
        temp.set_extension("tmp");
        std::fs::write(&temp, json)?;
        std::fs::rename(&temp, path)?;
        Ok(())
    }
}

/// How often checkpoints are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointCadence {
    Queries(u64),
    Seconds(u64),
}

/// Periodically snapshot the shared `done` counters to disk.
///
/// Runs until the stop flag rises, then writes one final checkpoint.
pub fn spawn_checkpoint_writer(
    path: PathBuf,
    cadence: CheckpointCadence,
    mut checkpoint: Checkpoint,
    done: Arc<Vec<AtomicU64>>,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let poll = Duration::from_millis(200);
        let mut last_written_total = 0u64;
        let mut since_last_write = Duration::ZERO;
        loop {
            let stopping = stop.load(Ordering::Relaxed);
            for (slot, counter) in checkpoint.done.iter_mut().zip(done.iter()) {
                *slot = counter.load(Ordering::Relaxed);
            }
            let total_done: u64 = checkpoint.done.iter().sum();
            let due = match cadence {
                CheckpointCadence::Queries(every) => {
                    total_done >= last_written_total + every.max(1)
                }
                CheckpointCadence::Seconds(every) => {
                    since_last_write >= Duration::from_secs(every.max(1))
                }
            };
            if due || stopping {
                if let Err(e) = checkpoint.write_atomic(&path) {
                    tracing::warn!("checkpoint write failed: {e}");
                } else {
                    tracing::debug!(total_done, "checkpoint written");
                    last_written_total = total_done;
                    since_last_write = Duration::ZERO;
                }
            }
            if stopping {
                return;
            }
            tokio::time::sleep(poll).await;
            since_last_write += poll;
        }
    })
}
