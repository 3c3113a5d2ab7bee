//! Single consumer of checkpoint mutations: buffers records and flushes one upsert transaction per batch.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use log::{debug, error, warn};
use rusqlite::Connection;
use serde::Serialize;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::types::{ChunkScope, FileRecord};
use crate::utils::config::StoreConsts;

use super::connection::{apply_chunk_mark, record_run_stats, upsert_file_batch};

/// Started/completed marker for one chunk.
#[derive(Clone, Debug)]
pub struct ChunkMark {
    /// Checkpoint key.
    pub key: String,
    /// Chunk directory in store form (used to compute totals).
    pub path: String,
    pub scope: ChunkScope,
    pub mount_point: String,
    pub scan_time: f64,
    pub completed: bool,
}

/// Row of the `scan_stats` table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunStatsRow {
    pub mount_point: String,
    pub files_scanned: u64,
    pub bytes_scanned: u64,
    pub start_time: f64,
    pub end_time: f64,
}

pub(crate) enum WriteOp {
    File(FileRecord),
    Chunk(ChunkMark),
    RunStats(RunStatsRow),
    Flush(Sender<Result<usize>>),
}

/// What the writer thread did over its lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WriterSummary {
    pub flushed: u64,
    pub failed_flushes: u64,
    /// Records (files and markers) that never reached the store.
    pub unflushed: u64,
}

/// Cloneable producer handle. Sending blocks when the queue is full.
#[derive(Clone)]
pub struct RecordSender {
    tx: Sender<WriteOp>,
}

impl RecordSender {
    pub fn send(&self, record: FileRecord) -> Result<()> {
        self.tx
            .send(WriteOp::File(record))
            .map_err(|_| anyhow::anyhow!("checkpoint writer stopped"))
    }

    pub(crate) fn send_op(&self, op: WriteOp) -> Result<()> {
        self.tx
            .send(op)
            .map_err(|_| anyhow::anyhow!("checkpoint writer stopped"))
    }
}

pub(crate) struct WriterConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub queue_cap: usize,
}

/// Spawn the writer thread owning `conn`. Returns the producer handle and the join handle.
pub(crate) fn spawn_writer(
    conn: Connection,
    cfg: WriterConfig,
) -> Result<(RecordSender, JoinHandle<WriterSummary>)> {
    let (tx, rx) = bounded::<WriteOp>(cfg.queue_cap.max(1));
    let handle = thread::Builder::new()
        .name("checkpoint-writer".to_string())
        .spawn(move || writer_loop(conn, rx, cfg))
        .context("spawn checkpoint writer")?;
    Ok((RecordSender { tx }, handle))
}

struct Pending {
    files: Vec<FileRecord>,
    marks: Vec<ChunkMark>,
    stats: Vec<RunStatsRow>,
}

impl Pending {
    fn len(&self) -> usize {
        self.files.len() + self.marks.len() + self.stats.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write everything pending in one pass. Files first so completed markers see their rows.
/// On error nothing is dropped; already-committed parts are removed from the buffer.
fn flush_pending(conn: &mut Connection, pending: &mut Pending) -> Result<usize> {
    let mut written = 0;
    if !pending.files.is_empty() {
        written += upsert_file_batch(conn, &pending.files)?;
        pending.files.clear();
    }
    if !pending.marks.is_empty() || !pending.stats.is_empty() {
        let tx = conn.transaction().context("begin marker transaction")?;
        for mark in &pending.marks {
            apply_chunk_mark(&tx, mark)?;
        }
        for row in &pending.stats {
            record_run_stats(&tx, row)?;
        }
        tx.commit().context("commit markers")?;
        written += pending.marks.len() + pending.stats.len();
        pending.marks.clear();
        pending.stats.clear();
    }
    Ok(written)
}

fn try_flush(
    conn: &mut Connection,
    pending: &mut Pending,
    summary: &mut WriterSummary,
) -> Result<usize> {
    match flush_pending(conn, pending) {
        Ok(n) => {
            summary.flushed += n as u64;
            if n > 0 {
                debug!("checkpoint flush: {} rows", n);
            }
            Ok(n)
        }
        Err(e) => {
            summary.failed_flushes += 1;
            warn!(
                "checkpoint flush failed ({} rows retained): {:#}",
                pending.len(),
                e
            );
            Err(e)
        }
    }
}

fn writer_loop(mut conn: Connection, rx: Receiver<WriteOp>, cfg: WriterConfig) -> WriterSummary {
    let batch_size = cfg.batch_size.max(1);
    let mut pending = Pending {
        files: Vec::with_capacity(batch_size),
        marks: Vec::new(),
        stats: Vec::new(),
    };
    let mut summary = WriterSummary::default();
    let mut last_flush = Instant::now();

    loop {
        let wait = cfg.flush_interval.saturating_sub(last_flush.elapsed());
        match rx.recv_timeout(wait) {
            Ok(WriteOp::File(record)) => {
                pending.files.push(record);
                if pending.files.len() >= batch_size {
                    let _ = try_flush(&mut conn, &mut pending, &mut summary);
                    last_flush = Instant::now();
                }
            }
            Ok(WriteOp::Chunk(mark)) => {
                pending.marks.push(mark);
                let _ = try_flush(&mut conn, &mut pending, &mut summary);
                last_flush = Instant::now();
            }
            Ok(WriteOp::RunStats(row)) => {
                pending.stats.push(row);
                let _ = try_flush(&mut conn, &mut pending, &mut summary);
                last_flush = Instant::now();
            }
            Ok(WriteOp::Flush(reply)) => {
                let result = try_flush(&mut conn, &mut pending, &mut summary);
                last_flush = Instant::now();
                let _ = reply.send(result);
            }
            Err(RecvTimeoutError::Timeout) => {
                if !pending.is_empty() {
                    let _ = try_flush(&mut conn, &mut pending, &mut summary);
                }
                last_flush = Instant::now();
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    for attempt in 1..=StoreConsts::FINAL_FLUSH_ATTEMPTS {
        if pending.is_empty() || try_flush(&mut conn, &mut pending, &mut summary).is_ok() {
            break;
        }
        if attempt < StoreConsts::FINAL_FLUSH_ATTEMPTS {
            thread::sleep(Duration::from_millis(100 * attempt as u64));
        }
    }
    if !pending.is_empty() {
        summary.unflushed = pending.len() as u64;
        error!(
            "checkpoint writer stopped with {} unflushed rows",
            summary.unflushed
        );
    }
    if let Err(e) = conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(())) {
        debug!("passive WAL checkpoint skipped: {}", e);
    }
    summary
}
