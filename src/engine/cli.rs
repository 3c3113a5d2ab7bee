//! CLI command handlers: `run` drives the orchestrator, `worker` scans one chunk, `stats` reads the store.

use anyhow::{Context, Result};
use log::{debug, info};

use crate::engine::arg_parser::{Cli, Commands, RunArgs, StatsArgs, WorkerArgs};
use crate::engine::db_ops::{get_stats, list_mounts, load_run_stats, open_db};
use crate::pipeline::run_scan_worker;
use crate::types::{RunConfig, ScanRequest};
use crate::utils::config::WorkerLimitConsts;
use crate::utils::shutdown::ShutdownSignal;
use crate::utils::{apply_file_to_config, load_scanner_toml, setup_logging};

const GIB: f64 = (1u64 << 30) as f64;
const MIB: u64 = 1 << 20;
/// Set by deployments that run the orchestrator itself in a container.
const HOST_DB_DIR_ENV: &str = "HOST_DB_DIR";

/// Defaults, then the settings file, then flags.
fn build_run_config(cli: &Cli, args: &RunArgs) -> RunConfig {
    let mut config = RunConfig::default();
    if let Some(file) = load_scanner_toml(cli.config.as_deref()) {
        apply_file_to_config(&file, &mut config);
    }

    config.root = args.root.clone();
    if let Some(ref m) = args.mount {
        config.mount_name = m.clone();
    }
    if let Some(ref db) = args.db {
        config.db_path = db.clone();
    }
    if let Some(n) = args.max_workers {
        config.max_workers = n.max(1);
    }
    if let Some(l) = args.launcher {
        config.launcher = l;
    }
    if let Some(ref image) = args.image {
        config.image = image.clone();
    }
    if let Some(ref rt) = args.runtime {
        config.container_runtime = rt.clone();
    }
    if let Some(ref dir) = args.host_db_dir {
        config.host_store_dir = Some(dir.clone());
    } else if config.host_store_dir.is_none()
        && let Some(dir) = std::env::var_os(HOST_DB_DIR_ENV).filter(|v| !v.is_empty())
    {
        config.host_store_dir = Some(dir.into());
    }
    if let Some(ref exe) = args.worker_exe {
        config.worker_exe = Some(exe.clone());
    }
    if let Some(gb) = args.target_chunk_gb {
        config.target_chunk_bytes = (gb * GIB) as u64;
    }
    if let Some(s) = args.analysis_timeout {
        config.analysis_timeout = std::time::Duration::from_secs(s);
    }
    config.fast_start |= args.fast_start;
    if let Some(d) = args.max_depth {
        config.max_depth = d;
    }
    if let Some(c) = args.concurrency {
        config.worker_concurrency = c.max(1);
    }
    if args.cpus.is_some() {
        config.worker_cpus = args.cpus;
    }
    if let Some(mb) = args.memory_mb {
        config.worker_memory_bytes = Some(mb * MIB);
    }
    if let Some(s) = args.max_runtime {
        config.max_runtime = std::time::Duration::from_secs(s);
    }
    if let Some(r) = args.max_retries {
        config.max_retries = r;
    }
    if let Some(ref p) = args.report {
        config.report_path = Some(p.clone());
    }
    config.verbose |= cli.verbose;
    config
}

pub fn handle(cli: &Cli) -> Result<()> {
    setup_logging(cli.verbose);
    match &cli.command {
        Commands::Run(args) => handle_run(cli, args),
        Commands::Worker(args) => handle_worker(args),
        Commands::Stats(args) => handle_stats(args),
    }
}

/// Run the orchestrator. Ctrl-C stops launches, kills active workers and flushes the store.
pub fn handle_run(cli: &Cli, args: &RunArgs) -> Result<()> {
    let config = build_run_config(cli, args);
    debug!("{} CONFIG:{:#?}", env!("CARGO_PKG_NAME").to_uppercase(), config);

    let shutdown = ShutdownSignal::new();
    let handler_signal = shutdown.clone();
    ctrlc::set_handler(move || handler_signal.trigger()).context("install Ctrl-C handler")?;

    let report = crate::run(&config, shutdown)?;
    if report.cancelled {
        anyhow::bail!(
            "run {} cancelled with {} chunks pending",
            report.run_id,
            report.pending
        );
    }
    Ok(())
}

/// Scan one chunk. Fails unless every record reached the store.
pub fn handle_worker(args: &WorkerArgs) -> Result<()> {
    let mut req = ScanRequest::new(&args.chunk_path, &args.mount, &args.db);
    req.concurrency = args
        .concurrency
        .unwrap_or(WorkerLimitConsts::CONCURRENCY)
        .max(1);
    req.files_only = args.files_only;
    let summary = run_scan_worker(&req)?;
    if !summary.is_full_success() {
        anyhow::bail!(
            "{} records under {} were not persisted",
            summary.unflushed,
            args.chunk_path.display()
        );
    }
    Ok(())
}

pub fn handle_stats(args: &StatsArgs) -> Result<()> {
    let conn = open_db(&args.db)?;
    let mounts = match &args.mount {
        Some(m) => vec![m.clone()],
        None => list_mounts(&conn)?,
    };
    if mounts.is_empty() {
        info!("{} holds no scanned chunks", args.db.display());
    }
    for mount in mounts {
        let stats = get_stats(&conn, &mount)?;
        println!(
            "{}: {} chunks, {} files, {:.2} GB",
            mount,
            stats.chunks,
            stats.files,
            stats.bytes as f64 / 1e9
        );
        if let Some(run) = load_run_stats(&conn, &mount)? {
            println!(
                "  last run: {} files, {:.2} GB in {:.0}s",
                run.files_scanned,
                run.bytes_scanned as f64 / 1e9,
                (run.end_time - run.start_time).max(0.0)
            );
        }
    }
    Ok(())
}
