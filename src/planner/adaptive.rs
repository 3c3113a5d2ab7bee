//! Adaptive generation: turn frontier directories into new chunks while a run is in progress.

use log::{debug, info, warn};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::engine::tools::{direct_files_summary, is_empty_directory, list_subdirectories};
use crate::types::{Chunk, ChunkKind, ChunkScope};

use super::{ChunkPlanner, CompletedSet, CountProbe};

/// Why a directory sits on the frontier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrontierOrigin {
    /// Not yet planned, such as the top-level directories queued by fast start.
    Remaining,
    /// The directory of a chunk that exhausted its retries.
    Abandoned,
    /// Below an abandoned chunk, queued by splitting it.
    EmergencySplit,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrontierEntry {
    pub path: PathBuf,
    /// Components below the scan root.
    pub depth: usize,
    pub origin: FrontierOrigin,
}

/// FIFO of directories awaiting adaptive chunking.
#[derive(Clone, Debug, Default)]
pub struct Frontier {
    queue: VecDeque<FrontierEntry>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: &Path, depth: usize, origin: FrontierOrigin) {
        self.queue.push_back(FrontierEntry {
            path: path.to_path_buf(),
            depth,
            origin,
        });
    }

    pub fn pop(&mut self) -> Option<FrontierEntry> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl ChunkPlanner {
    /// Pop frontier directories (FIFO) and emit at most `max` chunks; the rest of the frontier is kept.
    ///
    /// A directory holding at least `min_file_count` files that still has depth budget and
    /// subdirectories is split: its loose files become a direct-files chunk and its subdirectories go
    /// back on the frontier. Anything else becomes one subtree chunk. An abandoned directory is only
    /// ever split, never re-emitted whole.
    pub fn adaptive_chunks(
        &self,
        frontier: &mut Frontier,
        mount: &str,
        completed: &CompletedSet,
        max: usize,
    ) -> Vec<Chunk> {
        let opts = self.options();
        let mut out = Vec::new();

        while out.len() < max {
            if self.shutdown.is_triggered() {
                break;
            }
            let Some(entry) = frontier.pop() else { break };
            let dir = entry.path.as_path();
            if completed.covers(dir, ChunkScope::Subtree) || !dir.is_dir() {
                debug!("skipping frontier entry {} (done or missing)", dir.display());
                continue;
            }
            let readable = match is_empty_directory(dir) {
                Ok(true) => {
                    debug!("skipping empty frontier entry {}", dir.display());
                    continue;
                }
                Ok(false) => true,
                Err(e) => {
                    warn!("cannot read {}: {}", dir.display(), e);
                    false
                }
            };
            let kind = match entry.origin {
                FrontierOrigin::Remaining => ChunkKind::Adaptive,
                FrontierOrigin::Abandoned | FrontierOrigin::EmergencySplit => ChunkKind::Emergency,
            };
            let child_origin = match entry.origin {
                FrontierOrigin::Remaining => FrontierOrigin::Remaining,
                _ => FrontierOrigin::EmergencySplit,
            };
            let subdirs = if readable {
                list_subdirectories(dir).unwrap_or_default()
            } else {
                Vec::new()
            };
            let can_split = entry.depth < opts.max_depth && !subdirs.is_empty();
            let split = can_split
                && match entry.origin {
                    FrontierOrigin::Abandoned => true,
                    _ => {
                        completed.has_completed_descendants(dir)
                            || matches!(
                                self.prober().count_files(dir, opts.min_file_count),
                                CountProbe::ReachedLimit(_)
                            )
                    }
                };

            if split {
                debug!("splitting frontier directory {}", dir.display());
                if !completed.covers(dir, ChunkScope::DirectFiles) {
                    match direct_files_summary(dir) {
                        Ok((0, _)) => {}
                        Ok((_, loose_bytes)) => {
                            out.push(Chunk::direct_files(dir, mount, kind, loose_bytes))
                        }
                        Err(e) => {
                            warn!("cannot read loose files of {}: {}", dir.display(), e);
                            out.push(Chunk::direct_files(dir, mount, kind, 0));
                        }
                    }
                }
                for sub in subdirs {
                    frontier.push(&sub, entry.depth + 1, child_origin);
                }
            } else if entry.origin == FrontierOrigin::Abandoned {
                warn!(
                    "{} cannot be split further; leaving it abandoned",
                    dir.display()
                );
            } else {
                let bytes = self
                    .prober()
                    .cached(dir)
                    .map(|e| e.ordering_bytes())
                    .unwrap_or(0);
                out.push(Chunk::subtree(dir, mount, kind, bytes));
            }
        }

        if !out.is_empty() {
            info!(
                "generated {} adaptive chunks ({} frontier entries left)",
                out.len(),
                frontier.len()
            );
        }
        out
    }
}
