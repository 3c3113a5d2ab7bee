//! Pipeline context: shared state passed into the walk and record threads of one scan.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Skipped entries kept verbatim for the end-of-scan report; the rest are only counted.
const SKIPPED_SAMPLE_CAP: usize = 100;

/// Running totals shared by record threads and the metrics thread.
#[derive(Debug, Default)]
pub struct ScanCounters {
    pub files: AtomicU64,
    pub bytes: AtomicU64,
    pub skipped: AtomicU64,
}

impl ScanCounters {
    pub fn record_file(&self, size: u64) {
        self.files.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.files.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
            self.skipped.load(Ordering::Relaxed),
        )
    }
}

/// Shared context for the walk + record pipeline of one chunk.
#[derive(Clone)]
pub struct ScanContext {
    pub chunk_path: PathBuf,
    pub mount_name: String,
    /// Only the regular files directly inside `chunk_path`.
    pub files_only: bool,
    pub counters: Arc<ScanCounters>,
    pub skipped_paths: Arc<Mutex<Vec<(PathBuf, String)>>>,
}

impl ScanContext {
    pub fn new(chunk_path: &Path, mount_name: &str, files_only: bool) -> Self {
        Self {
            chunk_path: chunk_path.to_path_buf(),
            mount_name: mount_name.to_string(),
            files_only,
            counters: Arc::new(ScanCounters::default()),
            skipped_paths: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Count a per-entry failure; keep the first few for the report.
    pub fn record_skip(&self, path: PathBuf, msg: String) {
        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
        log::debug!("skipped {}: {}", path.display(), msg);
        let mut skipped = self.skipped_paths.lock().unwrap_or_else(|e| e.into_inner());
        if skipped.len() < SKIPPED_SAMPLE_CAP {
            skipped.push((path, msg));
        }
    }
}

/// Path channel between the walk thread and record threads.
pub struct ScanChannels {
    pub path_tx: Sender<PathBuf>,
    pub path_rx: Receiver<PathBuf>,
}

pub fn create_scan_channels(channel_cap: usize) -> ScanChannels {
    let (path_tx, path_rx) = bounded::<PathBuf>(channel_cap.max(1));
    ScanChannels { path_tx, path_rx }
}
