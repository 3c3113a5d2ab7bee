//! Scan worker: enumerate one chunk, fingerprint each file and upsert the records.

use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use log::{debug, info};
use std::time::Instant;

use crate::engine::db_ops::{CheckpointStore, StoreOptions};
use crate::types::{ScanRequest, ScanSummary};
use crate::utils::config::WorkerLimitConsts;
use crate::utils::fd_limit::determine_threads_given_fd_limit;

use super::context::{ScanContext, create_scan_channels};
use super::error_handler::report_skipped_paths;
use super::metadata::spawn_record_workers;
use super::metrics::{rates, spawn_metrics_thread};
use super::walk::spawn_walk_thread;

/// Walk → path channel → record threads → checkpoint writer.
///
/// Per-entry errors are counted and skipped. Fails only when the chunk path is missing or
/// unreadable, or the store cannot be opened. A summary with `unflushed > 0` means some records
/// never reached the store; the caller should exit non-zero.
pub fn run_scan_worker(req: &ScanRequest) -> Result<ScanSummary> {
    let start = Instant::now();
    std::fs::read_dir(&req.chunk_path)
        .with_context(|| format!("chunk path {} is missing or unreadable", req.chunk_path.display()))?;

    let concurrency = determine_threads_given_fd_limit(req.concurrency);
    let store = CheckpointStore::open(
        &req.store_path,
        StoreOptions {
            batch_size: req.batch_size,
            ..StoreOptions::default()
        },
    )?;
    debug!(
        "scanning {} (concurrency {}, files only: {})",
        req.chunk_path.display(),
        concurrency,
        req.files_only
    );

    let ctx = ScanContext::new(&req.chunk_path, &req.mount_name, req.files_only);
    let channels = create_scan_channels(WorkerLimitConsts::PATH_CHANNEL_CAP);
    let (stop_tx, stop_rx) = bounded::<()>(0);
    let metrics = spawn_metrics_thread(
        req.chunk_path.display().to_string(),
        ctx.counters.clone(),
        WorkerLimitConsts::METRICS_INTERVAL,
        stop_rx,
    );

    let walk_handle = spawn_walk_thread(channels.path_tx, ctx.clone(), concurrency);
    let sender = store.sender()?;
    let record_handles = spawn_record_workers(channels.path_rx, &sender, &ctx, concurrency);
    // Only record threads hold senders now; the writer finishes once they exit.
    drop(sender);

    let walked = walk_handle
        .join()
        .map_err(|_| anyhow::anyhow!("walk thread panicked"))?;
    for h in record_handles {
        if h.join().is_err() {
            log::error!("record thread panicked");
        }
    }
    drop(stop_tx);
    let _ = metrics.join();

    let writer = store.close()?;
    report_skipped_paths(&ctx, log::log_enabled!(log::Level::Debug));

    let (files, bytes, skipped) = ctx.counters.snapshot();
    let (fps, mbps) = rates(files, bytes, start.elapsed());
    info!(
        "{}: {} of {} files recorded, {} bytes, {} skipped, {} unflushed in {:.1}s ({:.0} files/s, {:.1} MB/s)",
        req.chunk_path.display(),
        files,
        walked,
        bytes,
        skipped,
        writer.unflushed,
        start.elapsed().as_secs_f64(),
        fps,
        mbps
    );
    Ok(ScanSummary {
        files,
        bytes,
        skipped,
        unflushed: writer.unflushed,
    })
}
