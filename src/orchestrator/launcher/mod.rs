//! Worker isolation behind one capability: start, poll, kill and clean up a scan worker.

mod container;
mod subprocess;

pub use container::{ContainerLauncher, parse_inspect_output};
pub use subprocess::SubprocessLauncher;

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::engine::tools::path_to_db_string;
use crate::types::{Chunk, RunConfig};
use crate::utils::config::WorkerLimitConsts;

/// Liveness of one worker as seen by a batched poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerStatus {
    Running,
    Exited(i32),
    /// The launcher no longer knows the worker (removed externally, never started).
    Missing,
}

/// CPU, memory and open-file ceilings for one worker.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ResourceLimits {
    pub cpus: f64,
    pub memory_bytes: u64,
    pub nofile: u64,
}

impl ResourceLimits {
    /// Explicit values from `config`, otherwise an even share of this host across `max_workers`.
    pub fn derive(config: &RunConfig) -> Self {
        let workers = config.max_workers.max(1);
        let cpus = config
            .worker_cpus
            .unwrap_or_else(|| ((rayon::current_num_threads() / workers).max(1)) as f64);
        let memory_bytes = config.worker_memory_bytes.unwrap_or_else(|| {
            let mut sys = sysinfo::System::new();
            sys.refresh_memory();
            (sys.total_memory() / workers as u64)
                .min(WorkerLimitConsts::MAX_MEMORY_BYTES)
                .max(WorkerLimitConsts::MIN_MEMORY_BYTES)
        });
        Self {
            cpus,
            memory_bytes,
            nofile: WorkerLimitConsts::NOFILE,
        }
    }
}

/// Everything a launcher needs to start one worker.
#[derive(Clone, Debug)]
pub struct WorkerSpec {
    pub worker_id: String,
    pub chunk: Chunk,
    pub store_path: PathBuf,
    pub concurrency: usize,
    pub limits: ResourceLimits,
}

/// Arguments of the `worker` subcommand for `spec`, with the store at `store_arg`.
pub fn worker_args(spec: &WorkerSpec, store_arg: &Path, concurrency: usize) -> Vec<String> {
    let mut args = vec![
        "worker".to_string(),
        path_to_db_string(&spec.chunk.path),
        spec.chunk.mount_name.clone(),
        "--db".to_string(),
        store_arg.display().to_string(),
        "--concurrency".to_string(),
        concurrency.to_string(),
    ];
    if spec.chunk.is_files_only() {
        args.push("--files-only".to_string());
    }
    args
}

/// Start/poll/kill/limit a worker. The orchestrator depends on nothing else about isolation.
pub trait WorkerLauncher {
    fn name(&self) -> &'static str;

    /// Start a worker with read-only access to the chunk, write access to the store, and `spec.limits`.
    fn launch(&mut self, spec: &WorkerSpec) -> Result<()>;

    /// Status of every listed worker in one call. Ids missing from the result are treated as [`WorkerStatus::Missing`].
    fn poll(&mut self, ids: &[String]) -> Result<HashMap<String, WorkerStatus>>;

    fn kill(&mut self, id: &str) -> Result<()>;

    /// Release resources of a worker that reached a terminal status.
    fn reap(&mut self, id: &str) -> Result<()>;

    /// Short description of why a worker failed (e.g. its last log lines).
    fn describe_failure(&mut self, _id: &str) -> Option<String> {
        None
    }
}

impl<L: WorkerLauncher + ?Sized> WorkerLauncher for Box<L> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn launch(&mut self, spec: &WorkerSpec) -> Result<()> {
        (**self).launch(spec)
    }

    fn poll(&mut self, ids: &[String]) -> Result<HashMap<String, WorkerStatus>> {
        (**self).poll(ids)
    }

    fn kill(&mut self, id: &str) -> Result<()> {
        (**self).kill(id)
    }

    fn reap(&mut self, id: &str) -> Result<()> {
        (**self).reap(id)
    }

    fn describe_failure(&mut self, id: &str) -> Option<String> {
        (**self).describe_failure(id)
    }
}
