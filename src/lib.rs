//! chunkscan: chunked, resumable directory scanner with isolated workers and a SQLite checkpoint store

pub mod engine;
pub mod orchestrator;
pub mod pipeline;
pub mod planner;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use orchestrator::{RunReport, WorkerLauncher, run_with_launcher};
pub use utils::shutdown::ShutdownSignal;

use log::debug;

use orchestrator::{ContainerLauncher, SubprocessLauncher};

/// Result alias used by the public API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Scan `config.root` to completion (or until `shutdown` fires) with the launcher `config.launcher` names.
///
/// Resumes from whatever the checkpoint store at `config.db_path` already holds. Returns `Err` only
/// for fatal setup problems; abandoned chunks are listed in the report.
pub fn run(config: &RunConfig, shutdown: ShutdownSignal) -> Result<RunReport> {
    match config.launcher {
        LauncherKind::Subprocess => {
            let launcher = match &config.worker_exe {
                Some(exe) => SubprocessLauncher::new(exe),
                None => SubprocessLauncher::current_exe()?,
            };
            debug!("workers run as child processes");
            run_with_launcher(config, launcher, shutdown)
        }
        LauncherKind::Container => {
            let launcher = ContainerLauncher::new(&config.container_runtime, &config.image)
                .with_host_store_dir(config.host_store_dir.clone());
            debug!(
                "workers run as {} containers from {}",
                config.container_runtime, config.image
            );
            run_with_launcher(config, launcher, shutdown)
        }
    }
}
