use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crate::engine::category::categorize;
use crate::engine::db_ops::RecordSender;
use crate::engine::hashing::fingerprint_file;
use crate::engine::tools::{path_to_db_string, system_time_to_unix, unix_now};
use crate::types::FileRecord;

use super::context::ScanContext;

/// Single record worker: read paths from path_rx, build records, hand them to the store writer.
fn record_worker_loop(path_rx: Receiver<PathBuf>, sender: RecordSender, ctx: ScanContext) {
    while let Ok(abs_path) = path_rx.recv() {
        match path_to_record(&abs_path, &ctx.mount_name) {
            Ok(Some(record)) => {
                let size = record.size;
                if sender.send(record).is_err() {
                    log::error!("checkpoint writer stopped; abandoning record thread");
                    break;
                }
                ctx.counters.record_file(size);
            }
            Ok(None) => {}
            Err(e) => ctx.record_skip(abs_path, format!("{:#}", e)),
        }
    }
}

/// Spawn record workers. Caller must drop its own `sender` clone afterwards so the writer can finish.
pub fn spawn_record_workers(
    path_rx: Receiver<PathBuf>,
    sender: &RecordSender,
    ctx: &ScanContext,
    num_threads: usize,
) -> Vec<JoinHandle<()>> {
    (0..num_threads.max(1))
        .map(|_| {
            let path_rx = path_rx.clone();
            let sender = sender.clone();
            let ctx = ctx.clone();
            thread::spawn(move || record_worker_loop(path_rx, sender, ctx))
        })
        .collect()
}

/// Stat (without following symlinks), classify and fingerprint one path.
/// `None` when the entry is no longer a regular file. Paths that are not valid UTF-8 are an error:
/// their store key would be lossy and could collide with another file's row.
pub fn path_to_record(abs_path: &Path, mount_name: &str) -> Result<Option<FileRecord>> {
    if abs_path.to_str().is_none() {
        anyhow::bail!("path is not valid UTF-8");
    }
    let meta = std::fs::symlink_metadata(abs_path).context("stat")?;
    if !meta.is_file() {
        return Ok(None);
    }
    let size = meta.len();
    let mtime = meta.modified().map(system_time_to_unix).unwrap_or(0.0);
    let (file_type, extension) = categorize(abs_path);
    let checksum = fingerprint_file(abs_path, size)?;
    Ok(Some(FileRecord {
        path: path_to_db_string(abs_path),
        mount_point: mount_name.to_string(),
        size,
        mtime,
        checksum: Some(checksum),
        file_type,
        extension,
        scan_time: unix_now(),
    }))
}
