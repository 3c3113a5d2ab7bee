//! Chunk planning: turn a root and the resume set into an ordered list of chunks.

pub mod adaptive;
pub mod completed;
pub mod initial;
pub mod sizing;

pub use adaptive::{Frontier, FrontierEntry, FrontierOrigin};
pub use completed::CompletedSet;
pub use sizing::{CountProbe, OversizeReason, SizeEstimate, SizeProber};

use std::cmp::Reverse;
use std::time::Duration;

use crate::types::{Chunk, RunConfig};
use crate::utils::shutdown::ShutdownSignal;

/// Thresholds the planner works with.
#[derive(Clone, Debug)]
pub struct PlannerOptions {
    pub target_chunk_bytes: u64,
    pub max_depth: usize,
    pub large_tree_files: u64,
    pub min_file_count: u64,
    pub probe_timeout: Duration,
    pub analysis_timeout: Duration,
}

impl From<&RunConfig> for PlannerOptions {
    fn from(c: &RunConfig) -> Self {
        Self {
            target_chunk_bytes: c.target_chunk_bytes,
            max_depth: c.max_depth,
            large_tree_files: c.large_tree_files,
            min_file_count: c.min_file_count,
            probe_timeout: c.probe_timeout,
            analysis_timeout: c.analysis_timeout,
        }
    }
}

/// Stateful planner; size estimates are cached for its lifetime.
pub struct ChunkPlanner {
    opts: PlannerOptions,
    prober: SizeProber,
    shutdown: ShutdownSignal,
}

impl ChunkPlanner {
    pub fn new(opts: PlannerOptions, shutdown: ShutdownSignal) -> Self {
        let prober = SizeProber::new(
            opts.large_tree_files,
            opts.probe_timeout,
            opts.analysis_timeout,
            shutdown.clone(),
        );
        Self {
            opts,
            prober,
            shutdown,
        }
    }

    pub fn options(&self) -> &PlannerOptions {
        &self.opts
    }

    pub fn prober(&self) -> &SizeProber {
        &self.prober
    }
}

/// Largest first; equal sizes by priority (higher first), then path for a stable order.
pub fn sort_for_dispatch(chunks: &mut [Chunk]) {
    chunks.sort_by(|a, b| {
        (Reverse(a.estimated_size), Reverse(a.priority), &a.path, a.scope as u8).cmp(&(
            Reverse(b.estimated_size),
            Reverse(b.priority),
            &b.path,
            b.scope as u8,
        ))
    });
}
