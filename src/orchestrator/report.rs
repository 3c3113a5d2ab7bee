//! Final report of one orchestrated run.

use anyhow::{Context, Result};
use log::{error, info};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::StoreStats;
use crate::utils::logger::Colors;

/// A chunk that exhausted its retries.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AbandonedChunk {
    /// Checkpoint key of the chunk.
    pub path: String,
    pub attempts: u32,
    /// Reason of the last failed attempt.
    pub reason: String,
    /// Backoff waits applied between attempts, in order.
    pub backoff_ms: Vec<u64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub root: PathBuf,
    pub mount: String,
    pub completed: usize,
    pub abandoned: Vec<AbandonedChunk>,
    /// Chunks neither completed nor abandoned when the run ended (non-zero only after cancellation).
    pub pending: usize,
    pub total_attempts: u64,
    pub failed_attempts: u64,
    pub timeouts: u64,
    pub elapsed_secs: f64,
    pub cancelled: bool,
    pub store: StoreStats,
}

impl RunReport {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serialize run report")?;
        fs::write(path, json).with_context(|| format!("write run report {}", path.display()))?;
        info!("run report written to {}", path.display());
        Ok(())
    }

    pub fn log_summary(&self) {
        let completed = format!("{} completed", self.completed);
        let abandoned = format!("{} abandoned", self.abandoned.len());
        let pending = format!("{} pending", self.pending);
        info!(
            "run {} on {} finished in {:.1}s: {}, {}, {} ({} attempts, {} failed)",
            self.run_id,
            self.root.display(),
            self.elapsed_secs,
            Colors::colorize(Colors::COMPLETED, &completed),
            Colors::colorize(Colors::ABANDONED, &abandoned),
            Colors::colorize(Colors::PENDING, &pending),
            self.total_attempts,
            self.failed_attempts
        );
        for a in &self.abandoned {
            error!(
                "abandoned {} after {} attempts: {}",
                a.path, a.attempts, a.reason
            );
        }
        info!(
            "store for mount '{}': {} chunks, {} files, {:.2} GB",
            self.mount,
            self.store.chunks,
            self.store.files,
            self.store.bytes as f64 / 1e9
        );
        if self.cancelled {
            info!("run was cancelled; rerun the same command to resume");
        }
    }
}
