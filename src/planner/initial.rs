//! Initial planning: size-driven subdivision and the fast top-level strategy.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use crate::engine::tools::{direct_files_summary, is_empty_directory, list_subdirectories};
use crate::types::{Chunk, ChunkKind, ChunkScope};

use super::{ChunkPlanner, CompletedSet, Frontier, FrontierOrigin, sort_for_dispatch};

fn level_kind(depth: usize) -> ChunkKind {
    if depth == 0 {
        ChunkKind::Root
    } else {
        ChunkKind::TopLevel
    }
}

impl ChunkPlanner {
    /// Subdivide `root` until every chunk is under the target size or the depth limit is reached.
    ///
    /// Walks level by level over an explicit work list; directories on one level are sized in parallel.
    /// Chunks covered by `completed` are skipped, and partially scanned directories are always
    /// subdivided so their completed parts are not re-emitted. Output is sorted largest first.
    pub fn initial_chunks(
        &self,
        root: &Path,
        mount: &str,
        completed: &CompletedSet,
    ) -> Result<Vec<Chunk>> {
        if completed.covers(root, ChunkScope::Subtree) {
            info!("{} already fully scanned", root.display());
            return Ok(Vec::new());
        }
        let opts = self.options();
        let mut chunks = Vec::new();
        let mut level: Vec<PathBuf> = vec![root.to_path_buf()];
        let mut depth = 0_usize;

        while !level.is_empty() {
            if self.shutdown.is_triggered() {
                warn!("planning interrupted; returning {} chunks", chunks.len());
                break;
            }
            let to_size: Vec<PathBuf> = level
                .iter()
                .filter(|d| !completed.has_completed_descendants(d))
                .cloned()
                .collect();
            self.prober().prefetch(&to_size);

            let mut next = Vec::new();
            for dir in level {
                let kind = level_kind(depth);
                match is_empty_directory(&dir) {
                    Ok(true) => {
                        debug!("skipping empty directory {}", dir.display());
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("cannot read {}: {}; keeping it as one chunk", dir.display(), e);
                        chunks.push(Chunk::subtree(&dir, mount, kind, 0));
                        continue;
                    }
                }
                let partial = completed.has_completed_descendants(&dir);
                let subdirs = match list_subdirectories(&dir) {
                    Ok(s) => s,
                    Err(e) => {
                        debug!("cannot list {}: {}; keeping as leaf", dir.display(), e);
                        Vec::new()
                    }
                };
                let estimate = self.prober().cached(&dir);
                let oversized = partial
                    || estimate.is_some_and(|e| e.exceeds(opts.target_chunk_bytes));

                if !oversized || subdirs.is_empty() || depth >= opts.max_depth {
                    let bytes = estimate.map(|e| e.ordering_bytes()).unwrap_or(0);
                    chunks.push(Chunk::subtree(&dir, mount, kind, bytes));
                    continue;
                }

                debug!("subdividing {} (depth {})", dir.display(), depth);
                if !completed.covers(&dir, ChunkScope::DirectFiles) {
                    match direct_files_summary(&dir) {
                        Ok((0, _)) => {}
                        Ok((_, loose_bytes)) => {
                            chunks.push(Chunk::direct_files(&dir, mount, kind, loose_bytes))
                        }
                        Err(e) => {
                            warn!("cannot read loose files of {}: {}", dir.display(), e);
                            chunks.push(Chunk::direct_files(&dir, mount, kind, 0));
                        }
                    }
                }
                next.extend(
                    subdirs
                        .into_iter()
                        .filter(|s| !completed.covers(s, ChunkScope::Subtree)),
                );
            }
            level = next;
            depth += 1;
        }

        sort_for_dispatch(&mut chunks);
        info!(
            "planned {} chunks under {} ({} already complete)",
            chunks.len(),
            root.display(),
            completed.len()
        );
        Ok(chunks)
    }

    /// No sizing: one chunk for the root's loose files now, and every top-level subdirectory queued on
    /// `frontier` for adaptive generation while the run progresses.
    pub fn fast_chunks(
        &self,
        root: &Path,
        mount: &str,
        completed: &CompletedSet,
        frontier: &mut Frontier,
    ) -> Result<Vec<Chunk>> {
        if completed.covers(root, ChunkScope::Subtree) {
            return Ok(Vec::new());
        }
        let subdirs = list_subdirectories(root)
            .with_context(|| format!("list top-level directories of {}", root.display()))?;
        let mut chunks = Vec::new();
        if !completed.covers(root, ChunkScope::DirectFiles) {
            let (loose, loose_bytes) = direct_files_summary(root)
                .with_context(|| format!("list loose files of {}", root.display()))?;
            if loose > 0 {
                chunks.push(Chunk::direct_files(root, mount, ChunkKind::Root, loose_bytes));
            }
        }
        let mut queued = 0_usize;
        for dir in subdirs {
            if completed.covers(&dir, ChunkScope::Subtree) {
                continue;
            }
            if let Ok(true) = is_empty_directory(&dir) {
                continue;
            }
            frontier.push(&dir, 1, FrontierOrigin::Remaining);
            queued += 1;
        }
        info!(
            "fast start: {} chunks under {}, {} top-level directories queued",
            chunks.len(),
            root.display(),
            queued
        );
        Ok(chunks)
    }
}
