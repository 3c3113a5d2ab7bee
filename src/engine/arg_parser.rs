use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::types::LauncherKind;

/// Chunked, resumable directory scanner.
#[derive(Clone, Parser)]
#[command(name = "chunkscan")]
#[command(about = "Scan a large directory tree in resumable chunks on isolated workers.")]
pub struct Cli {
    /// Verbose output (debug logs, progress bar).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Settings file. Default: `.chunkscan.toml` in the current directory.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Plan chunks under ROOT and run them on workers until done or interrupted.
    Run(RunArgs),
    /// Scan one chunk into the checkpoint store (started by the orchestrator).
    Worker(WorkerArgs),
    /// Print checkpoint store statistics per mount.
    Stats(StatsArgs),
}

/// Flags of `run`. Unset options fall back to the settings file, then to compiled defaults.
#[derive(Clone, Args)]
pub struct RunArgs {
    /// Directory tree to scan.
    #[arg(value_name = "ROOT")]
    pub root: PathBuf,

    /// Logical mount name recorded with every row.
    #[arg(value_name = "MOUNT")]
    pub mount: Option<String>,

    /// Checkpoint store path.
    #[arg(long, short)]
    pub db: Option<PathBuf>,

    /// Maximum simultaneously active workers.
    #[arg(long, short = 'w')]
    pub max_workers: Option<usize>,

    /// Worker isolation: subprocess or container.
    #[arg(long)]
    pub launcher: Option<LauncherKind>,

    /// Container image (container launcher).
    #[arg(long)]
    pub image: Option<String>,

    /// Container runtime binary, e.g. docker or podman.
    #[arg(long)]
    pub runtime: Option<String>,

    /// Host path of the store directory, for an orchestrator running inside a container
    /// (container launcher). Default: $HOST_DB_DIR, else the directory of --db.
    #[arg(long, value_name = "DIR")]
    pub host_db_dir: Option<PathBuf>,

    /// Worker executable (subprocess launcher). Default: this executable.
    #[arg(long)]
    pub worker_exe: Option<PathBuf>,

    /// Target chunk size in GiB; larger directories are subdivided.
    #[arg(long, value_name = "GIB")]
    pub target_chunk_gb: Option<f64>,

    /// Upper bound in seconds on sizing one directory.
    #[arg(long, value_name = "SECS")]
    pub analysis_timeout: Option<u64>,

    /// Skip sizing: top-level subdirectories are chunked as the run progresses.
    #[arg(long)]
    pub fast_start: bool,

    /// Subdivision depth limit below ROOT.
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Parallel enumeration/hashing tasks per worker.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// CPU ceiling per worker.
    #[arg(long)]
    pub cpus: Option<f64>,

    /// Memory ceiling per worker in MiB.
    #[arg(long, value_name = "MIB")]
    pub memory_mb: Option<u64>,

    /// Kill workers running longer than this many seconds.
    #[arg(long, value_name = "SECS")]
    pub max_runtime: Option<u64>,

    /// Retries per chunk before it is abandoned.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Write the final report as JSON.
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

#[derive(Clone, Args)]
pub struct WorkerArgs {
    /// Directory to scan.
    #[arg(value_name = "CHUNK_PATH")]
    pub chunk_path: PathBuf,

    /// Logical mount name recorded with every row.
    #[arg(value_name = "MOUNT")]
    pub mount: String,

    /// Checkpoint store path.
    #[arg(long, short)]
    pub db: PathBuf,

    /// Parallel enumeration/hashing tasks.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Only the regular files directly inside CHUNK_PATH.
    #[arg(long)]
    pub files_only: bool,
}

#[derive(Clone, Args)]
pub struct StatsArgs {
    /// Checkpoint store path.
    #[arg(long, short)]
    pub db: PathBuf,

    /// Only this mount. Default: every mount in the store.
    #[arg(value_name = "MOUNT")]
    pub mount: Option<String>,
}
