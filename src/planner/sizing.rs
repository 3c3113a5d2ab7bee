//! Bounded size probes: file count, fast parallel size, exhaustive size.

use jwalk::Parallelism;
use log::debug;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::utils::shutdown::ShutdownSignal;

/// Threads used by one fast aggregate-size walk.
const FAST_SIZE_THREADS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OversizeReason {
    /// File-count probe reached the large-tree threshold.
    LargeTree,
    /// Probe or exhaustive sizing ran out of time.
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeEstimate {
    Exact(u64),
    Oversized(OversizeReason),
}

impl SizeEstimate {
    pub fn exceeds(&self, target: u64) -> bool {
        match self {
            SizeEstimate::Exact(n) => *n > target,
            SizeEstimate::Oversized(_) => true,
        }
    }

    /// Value used for largest-first ordering. Oversized directories sort ahead of every exact size.
    pub fn ordering_bytes(&self) -> u64 {
        match self {
            SizeEstimate::Exact(n) => *n,
            SizeEstimate::Oversized(_) => u64::MAX,
        }
    }
}

/// Result of the bounded file-count probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountProbe {
    Complete(u64),
    /// Stopped at the limit; at least this many files.
    ReachedLimit(u64),
    TimedOut(u64),
}

impl CountProbe {
    /// Files seen before the probe stopped.
    pub fn seen(&self) -> u64 {
        match *self {
            CountProbe::Complete(n) | CountProbe::ReachedLimit(n) | CountProbe::TimedOut(n) => n,
        }
    }
}

/// Caching prober shared by planning passes. Safe to call from rayon workers.
pub struct SizeProber {
    large_tree_files: u64,
    probe_timeout: Duration,
    analysis_timeout: Duration,
    shutdown: ShutdownSignal,
    cache: Mutex<HashMap<PathBuf, SizeEstimate>>,
}

impl SizeProber {
    pub fn new(
        large_tree_files: u64,
        probe_timeout: Duration,
        analysis_timeout: Duration,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            large_tree_files,
            probe_timeout,
            analysis_timeout,
            shutdown,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached(&self, dir: &Path) -> Option<SizeEstimate> {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(dir)
            .copied()
    }

    /// Size `dirs` in parallel, filling the cache.
    pub fn prefetch(&self, dirs: &[PathBuf]) {
        dirs.par_iter().for_each(|d| {
            let _ = self.estimate(d);
        });
    }

    /// Count probe, then fast size, then exhaustive size. Never blocks past the configured timeouts.
    pub fn estimate(&self, dir: &Path) -> SizeEstimate {
        if let Some(hit) = self.cached(dir) {
            return hit;
        }
        let estimate = self.estimate_uncached(dir);
        debug!("size estimate {}: {:?}", dir.display(), estimate);
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(dir.to_path_buf(), estimate);
        estimate
    }

    fn estimate_uncached(&self, dir: &Path) -> SizeEstimate {
        match self.count_files(dir, self.large_tree_files) {
            CountProbe::ReachedLimit(_) => return SizeEstimate::Oversized(OversizeReason::LargeTree),
            CountProbe::TimedOut(_) => return SizeEstimate::Oversized(OversizeReason::TimedOut),
            CountProbe::Complete(_) => {}
        }
        if let Some(bytes) = self.fast_size(dir) {
            return SizeEstimate::Exact(bytes);
        }
        match self.exhaustive_size(dir) {
            Some(bytes) => SizeEstimate::Exact(bytes),
            None => SizeEstimate::Oversized(OversizeReason::TimedOut),
        }
    }

    /// Count regular files below `dir`, stopping at `limit` or the probe timeout.
    pub fn count_files(&self, dir: &Path, limit: u64) -> CountProbe {
        let start = Instant::now();
        let mut count = 0_u64;
        for entry in walkdir::WalkDir::new(dir).follow_links(false) {
            let Ok(entry) = entry else { continue };
            if entry.file_type().is_file() {
                count += 1;
                if count >= limit {
                    return CountProbe::ReachedLimit(count);
                }
            }
            if start.elapsed() > self.probe_timeout || self.shutdown.is_triggered() {
                return CountProbe::TimedOut(count);
            }
        }
        CountProbe::Complete(count)
    }

    /// Parallel aggregate size; `None` when the probe timeout expires.
    fn fast_size(&self, dir: &Path) -> Option<u64> {
        let start = Instant::now();
        let mut total = 0_u64;
        let walk = jwalk::WalkDir::new(dir)
            .skip_hidden(false)
            .follow_links(false)
            .parallelism(Parallelism::RayonNewPool(FAST_SIZE_THREADS));
        for entry in walk {
            if start.elapsed() > self.probe_timeout || self.shutdown.is_triggered() {
                return None;
            }
            let Ok(entry) = entry else { continue };
            if entry.file_type().is_file()
                && let Ok(meta) = entry.metadata()
            {
                total += meta.len();
            }
        }
        Some(total)
    }

    /// Serial exhaustive size; `None` when the analysis timeout expires.
    fn exhaustive_size(&self, dir: &Path) -> Option<u64> {
        let start = Instant::now();
        let mut total = 0_u64;
        for entry in walkdir::WalkDir::new(dir).follow_links(false) {
            if start.elapsed() > self.analysis_timeout || self.shutdown.is_triggered() {
                return None;
            }
            let Ok(entry) = entry else { continue };
            if entry.file_type().is_file()
                && let Ok(meta) = entry.metadata()
            {
                total += meta.len();
            }
        }
        Some(total)
    }
}
