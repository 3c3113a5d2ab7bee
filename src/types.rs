//! Public types shared by the planner, the checkpoint store, the scan worker and the orchestrator.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::tools::path_to_db_string;
use crate::utils::config::{
    PlannerConsts, RetryConsts, ScanDefaults, StoreConsts, WorkerLimitConsts,
};

/// Where a chunk came from. Used for logging, reporting and adaptive re-chunking decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// The scan root itself (or its loose files when the root was subdivided).
    Root,
    /// Produced by initial planning below the root.
    TopLevel,
    /// Produced by adaptive generation from the frontier.
    Adaptive,
    /// Produced by splitting a chunk that was abandoned after exhausting its retries.
    Emergency,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Root => "root",
            ChunkKind::TopLevel => "top-level",
            ChunkKind::Adaptive => "adaptive",
            ChunkKind::Emergency => "emergency",
        }
    }

    /// Tie-break for ordering chunks of equal estimated size: higher runs first.
    pub fn default_priority(&self) -> u8 {
        match self {
            ChunkKind::Emergency => 3,
            ChunkKind::Adaptive => 2,
            ChunkKind::TopLevel => 1,
            ChunkKind::Root => 0,
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What part of the directory a chunk covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkScope {
    /// The directory and everything below it.
    Subtree,
    /// Only the regular files directly inside the directory.
    DirectFiles,
}

/// Suffix appended to a directory path to form the checkpoint key of a [`ChunkScope::DirectFiles`] chunk.
pub const DIRECT_FILES_SUFFIX: &str = "/.";

/// Checkpoint key for a chunk path and scope. Subtree keys are the normalized path;
/// direct-files keys carry [`DIRECT_FILES_SUFFIX`] so they never collide with the subtree key.
pub fn chunk_key(path: &Path, scope: ChunkScope) -> String {
    let base = path_to_db_string(path);
    match scope {
        ChunkScope::Subtree => base,
        ChunkScope::DirectFiles => format!("{}{}", base.trim_end_matches('/'), DIRECT_FILES_SUFFIX),
    }
}

/// A unit of work: one subtree (or one directory's loose files) dispatched to one worker.
/// Identity is [`Chunk::key`]. Never mutated after the planner creates it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub path: PathBuf,
    pub mount_name: String,
    pub kind: ChunkKind,
    pub scope: ChunkScope,
    pub priority: u8,
    /// Estimated bytes under the chunk (0 when unknown or skipped by fast planning).
    pub estimated_size: u64,
}

impl Chunk {
    pub fn subtree(path: &Path, mount_name: &str, kind: ChunkKind, estimated_size: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            mount_name: mount_name.to_string(),
            kind,
            scope: ChunkScope::Subtree,
            priority: kind.default_priority(),
            estimated_size,
        }
    }

    pub fn direct_files(path: &Path, mount_name: &str, kind: ChunkKind, estimated_size: u64) -> Self {
        Self {
            scope: ChunkScope::DirectFiles,
            ..Self::subtree(path, mount_name, kind, estimated_size)
        }
    }

    pub fn key(&self) -> String {
        chunk_key(&self.path, self.scope)
    }

    pub fn is_files_only(&self) -> bool {
        self.scope == ChunkScope::DirectFiles
    }
}

/// Row of the `scanned_dirs` table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChunkRecord {
    /// Chunk key (see [`chunk_key`]).
    pub path: String,
    pub mount_point: String,
    /// Seconds since the Unix epoch.
    pub scan_time: f64,
    pub files_count: u64,
    pub total_size: u64,
    /// False while the chunk is in flight; true once a worker finished it successfully.
    pub complete: bool,
}

/// Row of the `files` table. Upserted on `(path, mount_point)`.
#[derive(Clone, Debug, PartialEq)]
pub struct FileRecord {
    pub path: String,
    pub mount_point: String,
    pub size: u64,
    /// Modification time in seconds since the Unix epoch.
    pub mtime: f64,
    pub checksum: Option<String>,
    pub file_type: &'static str,
    /// Lowercase extension with the leading dot, or empty.
    pub extension: String,
    pub scan_time: f64,
}

/// Aggregate counts for one mount in the checkpoint store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub chunks: u64,
    pub files: u64,
    pub bytes: u64,
}

/// Which isolation mechanism runs the scan workers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LauncherKind {
    /// Child process of the orchestrator with rlimit ceilings.
    #[default]
    Subprocess,
    /// Container started through a container runtime CLI (docker, podman).
    Container,
}

impl std::str::FromStr for LauncherKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "subprocess" | "process" | "native" => Ok(LauncherKind::Subprocess),
            "container" | "docker" | "podman" => Ok(LauncherKind::Container),
            other => Err(anyhow::anyhow!("unknown launcher '{}'", other)),
        }
    }
}

/// Full options for one orchestrated run. Built by the CLI from defaults, `.chunkscan.toml` and flags;
/// library callers can start from [`RunConfig::default`].
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Directory tree to scan.
    pub root: PathBuf,
    /// Logical name recorded as `mount_point` in every row.
    pub mount_name: String,
    /// Checkpoint store (SQLite) location.
    pub db_path: PathBuf,
    /// Maximum simultaneously active workers.
    pub max_workers: usize,
    pub launcher: LauncherKind,
    /// Container image (container launcher).
    pub image: String,
    /// Container runtime binary (container launcher).
    pub container_runtime: String,
    /// Host-side directory of the store, bound into worker containers when the orchestrator
    /// itself runs in a container and sees the store under another path. None = `db_path`'s parent.
    pub host_store_dir: Option<PathBuf>,
    /// Worker executable (subprocess launcher). None = the current executable.
    pub worker_exe: Option<PathBuf>,
    /// Directories estimated above this many bytes are subdivided.
    pub target_chunk_bytes: u64,
    /// Upper bound on the exhaustive sizing of one directory.
    pub analysis_timeout: Duration,
    /// Bound on the file-count probe and the fast aggregate-size probe.
    pub probe_timeout: Duration,
    /// Skip sizing: queue the top-level subdirectories for adaptive generation.
    pub fast_start: bool,
    /// Subdivision depth limit below the root.
    pub max_depth: usize,
    /// File count above which a directory is treated as oversized without exact sizing.
    pub large_tree_files: u64,
    /// Adaptive generation splits a frontier directory only when it holds at least this many files.
    pub min_file_count: u64,
    /// Most chunks produced by one adaptive generation call.
    pub adaptive_batch: usize,
    /// Parallel enumeration/hashing tasks inside one worker.
    pub worker_concurrency: usize,
    /// CPU ceiling per worker. None = derived from available threads.
    pub worker_cpus: Option<f64>,
    /// Memory ceiling per worker in bytes. None = derived from total memory.
    pub worker_memory_bytes: Option<u64>,
    /// Workers running longer than this are killed and counted as failed.
    pub max_runtime: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Interval between batched status polls of active workers.
    pub poll_interval: Duration,
    /// Interval between status log lines.
    pub status_interval: Duration,
    /// Records buffered before the store flushes a transaction.
    pub batch_size: usize,
    /// Periodic store flush.
    pub flush_interval: Duration,
    /// Write the final report here as JSON.
    pub report_path: Option<PathBuf>,
    /// Show a progress bar over chunk completions.
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            mount_name: String::from(ScanDefaults::MOUNT_NAME),
            db_path: PathBuf::from(ScanDefaults::DB_PATH),
            max_workers: ScanDefaults::MAX_WORKERS,
            launcher: LauncherKind::default(),
            image: String::from(ScanDefaults::IMAGE),
            container_runtime: String::from(ScanDefaults::CONTAINER_RUNTIME),
            host_store_dir: None,
            worker_exe: None,
            target_chunk_bytes: PlannerConsts::TARGET_CHUNK_BYTES,
            analysis_timeout: PlannerConsts::ANALYSIS_TIMEOUT,
            probe_timeout: PlannerConsts::PROBE_TIMEOUT,
            fast_start: false,
            max_depth: PlannerConsts::MAX_DEPTH,
            large_tree_files: PlannerConsts::LARGE_TREE_FILES,
            min_file_count: PlannerConsts::MIN_FILE_COUNT,
            adaptive_batch: PlannerConsts::ADAPTIVE_BATCH,
            worker_concurrency: WorkerLimitConsts::CONCURRENCY,
            worker_cpus: None,
            worker_memory_bytes: None,
            max_runtime: RetryConsts::MAX_RUNTIME,
            max_retries: RetryConsts::MAX_RETRIES,
            backoff_base: RetryConsts::BACKOFF_BASE,
            backoff_cap: RetryConsts::BACKOFF_CAP,
            poll_interval: ScanDefaults::POLL_INTERVAL,
            status_interval: ScanDefaults::STATUS_INTERVAL,
            batch_size: StoreConsts::BATCH_SIZE,
            flush_interval: StoreConsts::FLUSH_INTERVAL,
            report_path: None,
            verbose: false,
        }
    }
}

/// Input of one scan worker run.
#[derive(Clone, Debug)]
pub struct ScanRequest {
    pub chunk_path: PathBuf,
    pub mount_name: String,
    pub store_path: PathBuf,
    pub concurrency: usize,
    /// Only the regular files directly inside `chunk_path`.
    pub files_only: bool,
    /// Records buffered before the worker's store writer flushes.
    pub batch_size: usize,
}

impl ScanRequest {
    pub fn new(chunk_path: &Path, mount_name: &str, store_path: &Path) -> Self {
        Self {
            chunk_path: chunk_path.to_path_buf(),
            mount_name: mount_name.to_string(),
            store_path: store_path.to_path_buf(),
            concurrency: WorkerLimitConsts::CONCURRENCY,
            files_only: false,
            batch_size: StoreConsts::BATCH_SIZE,
        }
    }
}

/// Outcome of one scan worker run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub files: u64,
    pub bytes: u64,
    /// Entries skipped because of per-entry I/O errors.
    pub skipped: u64,
    /// Records the store writer could not persist.
    pub unflushed: u64,
}

impl ScanSummary {
    /// A worker exits 0 only when every record it produced reached the store.
    pub fn is_full_success(&self) -> bool {
        self.unflushed == 0
    }
}
