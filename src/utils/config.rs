//! Application configuration constants.
//! Tuning and thresholds in one place.

use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    config_filename: String,
    worker_prefix: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                config_filename: format!(".{pkg}.toml"),
                worker_prefix: pkg.to_string(),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Name of the optional config file looked up in the working directory.
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// Prefix of every worker identifier (container names, log lines).
    pub fn worker_prefix(&self) -> &str {
        &self.worker_prefix
    }
}

// ---- Run defaults ----

/// Defaults for invocation parameters that have no better home.
pub struct ScanDefaults;

impl ScanDefaults {
    pub const MOUNT_NAME: &'static str = "default";
    pub const DB_PATH: &'static str = "chunkscan.db";
    pub const MAX_WORKERS: usize = 6;
    pub const IMAGE: &'static str = "chunkscan:latest";
    pub const CONTAINER_RUNTIME: &'static str = "docker";
    pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
    pub const STATUS_INTERVAL: Duration = Duration::from_secs(30);
}

// ---- Planner ----

/// Chunk planning thresholds.
pub struct PlannerConsts;

impl PlannerConsts {
    /// 100 GiB.
    pub const TARGET_CHUNK_BYTES: u64 = 100 * 1024 * 1024 * 1024;
    /// Exhaustive sizing bound per directory (30 minutes).
    pub const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(1800);
    /// File-count and fast-size probe bound per directory.
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(60);
    pub const MAX_DEPTH: usize = 4;
    /// Above this many files, skip exact sizing and treat the directory as oversized.
    pub const LARGE_TREE_FILES: u64 = 1_000_000;
    pub const MIN_FILE_COUNT: u64 = 10_000;
    pub const ADAPTIVE_BATCH: usize = 5;
}

// ---- Retry / lifecycle ----

/// Worker lifecycle limits.
pub struct RetryConsts;

impl RetryConsts {
    pub const MAX_RETRIES: u32 = 3;
    pub const BACKOFF_BASE: Duration = Duration::from_secs(1);
    pub const BACKOFF_CAP: Duration = Duration::from_secs(300);
    /// One hour per worker attempt.
    pub const MAX_RUNTIME: Duration = Duration::from_secs(3600);
    /// Bound on a single container runtime CLI call (launch, inspect, kill).
    pub const RUNTIME_CALL_TIMEOUT: Duration = Duration::from_secs(30);
}

// ---- Worker resources ----

/// Per-worker resource ceilings.
pub struct WorkerLimitConsts;

impl WorkerLimitConsts {
    /// Inner enumeration/hashing tasks per worker.
    pub const CONCURRENCY: usize = 8;
    /// Memory ceiling cap when derived from total memory (12 GiB).
    pub const MAX_MEMORY_BYTES: u64 = 12 * 1024 * 1024 * 1024;
    /// Floor for a derived memory ceiling (1 GiB).
    pub const MIN_MEMORY_BYTES: u64 = 1024 * 1024 * 1024;
    /// Open-file ceiling handed to workers.
    pub const NOFILE: u64 = 65_536;
    /// Path channel capacity inside a worker.
    pub const PATH_CHANNEL_CAP: usize = 50_000;
    /// Interval between throughput log lines.
    pub const METRICS_INTERVAL: Duration = Duration::from_secs(10);
}

// ---- Hashing ----

/// Fingerprint thresholds and buffer sizes.
pub struct HashingConsts;

impl HashingConsts {
    /// Files above this size are fingerprinted from samples (10 MiB).
    pub const LARGE_FILE_THRESHOLD: u64 = 10 * 1024 * 1024;
    /// Size of each head/middle/tail sample (64 KiB).
    pub const SAMPLE_SIZE: u64 = 64 * 1024;
    /// File size above which full-content hashing uses memory-mapped I/O (4 MiB).
    pub const HASH_MMAP_THRESHOLD: u64 = 4 * 1024 * 1024;
    /// Chunk size for buffered reads below the mmap threshold (1 MiB).
    pub const HASH_READ_CHUNK_SIZE: usize = 1024 * 1024;
    /// Checksum recorded for zero-length files.
    pub const EMPTY_SENTINEL: &'static str = "empty";
}

// ---- Checkpoint store ----

/// Checkpoint store batching and SQLite tuning.
pub struct StoreConsts;

impl StoreConsts {
    /// Records per upsert transaction.
    pub const BATCH_SIZE: usize = 1000;
    /// Periodic flush of a partially filled batch.
    pub const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
    /// Bounded queue between producers and the single writer thread.
    pub const QUEUE_CAP: usize = 10_000;
    /// Several worker processes share the store file.
    pub const BUSY_TIMEOUT: Duration = Duration::from_secs(30);
    /// Flush attempts made at shutdown before giving up on the remainder.
    pub const FINAL_FLUSH_ATTEMPTS: usize = 3;
}
