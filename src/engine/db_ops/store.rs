//! Checkpoint store facade: a writer thread for every mutation plus a separate read connection.

use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use rusqlite::Connection;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::engine::tools::{path_to_db_string, unix_now};
use crate::types::{Chunk, ChunkRecord, FileRecord, StoreStats};
use crate::utils::config::StoreConsts;

use super::connection::{
    get_stats, load_chunk_records, load_completed_chunks, open_db_with_timeout, truncate_wal,
};
use super::writer::{
    ChunkMark, RecordSender, RunStatsRow, WriteOp, WriterConfig, WriterSummary, spawn_writer,
};

/// Writer batching and connection tuning.
#[derive(Clone, Copy, Debug)]
pub struct StoreOptions {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub queue_cap: usize,
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            batch_size: StoreConsts::BATCH_SIZE,
            flush_interval: StoreConsts::FLUSH_INTERVAL,
            queue_cap: StoreConsts::QUEUE_CAP,
            busy_timeout: StoreConsts::BUSY_TIMEOUT,
        }
    }
}

/// Durable record of completed chunks and observed files.
///
/// Mutations are queued to one writer thread and may lag reads by up to one batch;
/// call [`CheckpointStore::flush`] before reading when that matters.
pub struct CheckpointStore {
    path: PathBuf,
    reader: Connection,
    sender: Option<RecordSender>,
    writer: Option<JoinHandle<WriterSummary>>,
}

impl CheckpointStore {
    /// Open or create the store at `path`. Failure here is fatal to a run.
    pub fn open(path: &Path, opts: StoreOptions) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create store directory {}", parent.display()))?;
        }
        let writer_conn = open_db_with_timeout(path, opts.busy_timeout)?;
        let reader = open_db_with_timeout(path, opts.busy_timeout)?;
        let (sender, writer) = spawn_writer(
            writer_conn,
            WriterConfig {
                batch_size: opts.batch_size,
                flush_interval: opts.flush_interval.max(Duration::from_millis(1)),
                queue_cap: opts.queue_cap,
            },
        )?;
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            sender: Some(sender),
            writer: Some(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sender_ref(&self) -> Result<&RecordSender> {
        self.sender
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("checkpoint store already closed"))
    }

    /// Producer handle for pipeline threads.
    pub fn sender(&self) -> Result<RecordSender> {
        self.sender_ref().cloned()
    }

    fn mark(&self, chunk: &Chunk, completed: bool) -> Result<()> {
        self.sender_ref()?.send_op(WriteOp::Chunk(ChunkMark {
            key: chunk.key(),
            path: path_to_db_string(&chunk.path),
            scope: chunk.scope,
            mount_point: chunk.mount_name.clone(),
            scan_time: unix_now(),
            completed,
        }))
    }

    /// Record that a chunk is in flight (`complete = 0`). Never downgrades a completed row.
    pub fn mark_chunk_started(&self, chunk: &Chunk) -> Result<()> {
        self.mark(chunk, false)
    }

    /// Record a successful chunk; file count and bytes are taken from the rows under it.
    pub fn mark_chunk_completed(&self, chunk: &Chunk) -> Result<()> {
        self.mark(chunk, true)
    }

    pub fn append_file_records(&self, batch: Vec<FileRecord>) -> Result<()> {
        let sender = self.sender_ref()?;
        for record in batch {
            sender.send(record)?;
        }
        Ok(())
    }

    pub fn record_run_stats(
        &self,
        mount: &str,
        stats: StoreStats,
        start_time: f64,
        end_time: f64,
    ) -> Result<()> {
        self.sender_ref()?.send_op(WriteOp::RunStats(RunStatsRow {
            mount_point: mount.to_string(),
            files_scanned: stats.files,
            bytes_scanned: stats.bytes,
            start_time,
            end_time,
        }))
    }

    /// Flush everything queued so far and wait for the result. On failure the rows stay buffered.
    pub fn flush(&self) -> Result<usize> {
        let (tx, rx) = bounded(1);
        self.sender_ref()?.send_op(WriteOp::Flush(tx))?;
        rx.recv()
            .map_err(|_| anyhow::anyhow!("checkpoint writer stopped"))?
    }

    pub fn load_completed_chunks(&self, mount: &str) -> Result<HashSet<String>> {
        load_completed_chunks(&self.reader, mount)
    }

    pub fn get_stats(&self, mount: &str) -> Result<StoreStats> {
        get_stats(&self.reader, mount)
    }

    pub fn load_chunk_records(&self, mount: &str) -> Result<Vec<ChunkRecord>> {
        load_chunk_records(&self.reader, mount)
    }

    /// Read connection for ad-hoc queries.
    pub fn reader(&self) -> &Connection {
        &self.reader
    }

    /// Stop the writer after it drains the queue. Every [`RecordSender`] clone must be dropped first.
    pub fn close(mut self) -> Result<WriterSummary> {
        self.shutdown_writer()
    }

    /// Like [`CheckpointStore::close`], then fold the WAL into the main file.
    pub fn close_and_checkpoint(mut self) -> Result<WriterSummary> {
        let summary = self.shutdown_writer()?;
        if let Err(e) = truncate_wal(&self.reader) {
            log::debug!("WAL truncate skipped: {:#}", e);
        }
        Ok(summary)
    }

    fn shutdown_writer(&mut self) -> Result<WriterSummary> {
        drop(self.sender.take());
        match self.writer.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow::anyhow!("checkpoint writer thread panicked")),
            None => Ok(WriterSummary::default()),
        }
    }
}

impl Drop for CheckpointStore {
    fn drop(&mut self) {
        if self.writer.is_some()
            && let Err(e) = self.shutdown_writer()
        {
            log::error!("{:#}", e);
        }
    }
}
