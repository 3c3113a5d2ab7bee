//! Open the checkpoint store and run its queries.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::engine::tools::subtree_range;
use crate::types::{ChunkRecord, ChunkScope, FileRecord, StoreStats};
use crate::utils::config::StoreConsts;

use super::writer::{ChunkMark, RunStatsRow};
use super::{
    MARK_COMPLETED_SQL, MARK_STARTED_SQL, SCHEMA, UPSERT_FILE_SQL, UPSERT_RUN_STATS_SQL,
    WAL_PRAGMAS,
};

/// Enable WAL and apply schema to an open connection (idempotent).
fn apply_wal_and_schema(conn: &Connection) -> Result<()> {
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        .context("enable WAL")?;
    conn.execute_batch(WAL_PRAGMAS).context("set WAL pragmas")?;
    conn.execute_batch(SCHEMA).context("create schema")?;
    Ok(())
}

/// Open or create the checkpoint store and ensure schema + WAL.
pub fn open_db(path: &Path) -> Result<Connection> {
    open_db_with_timeout(path, StoreConsts::BUSY_TIMEOUT)
}

/// Like [`open_db`] with an explicit busy timeout (several processes share the file).
pub fn open_db_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("open checkpoint store {}", path.display()))?;
    conn.busy_timeout(busy_timeout).context("set busy timeout")?;
    apply_wal_and_schema(&conn)?;
    Ok(conn)
}

/// Open an in-memory DB with the same schema (tests, tooling; no WAL pragmas needed).
pub fn open_db_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory database")?;
    conn.execute_batch(SCHEMA).context("create schema")?;
    Ok(conn)
}

/// Upsert a batch of file records in a single transaction. Returns batch length.
pub fn upsert_file_batch(conn: &mut Connection, batch: &[FileRecord]) -> Result<usize> {
    let tx = conn.transaction().context("begin transaction")?;
    {
        let mut stmt = tx.prepare_cached(UPSERT_FILE_SQL).context("prepare upsert")?;
        for r in batch {
            stmt.execute(params![
                r.path,
                r.mount_point,
                r.size as i64,
                r.mtime,
                r.checksum,
                r.file_type,
                r.extension,
                r.scan_time,
            ])
            .context("upsert file")?;
        }
    }
    tx.commit().context("commit transaction")?;
    Ok(batch.len())
}

/// Apply a started/completed marker. Completed markers fill `files_count`/`total_size` from the files table.
pub fn apply_chunk_mark(conn: &Connection, mark: &ChunkMark) -> Result<()> {
    if mark.completed {
        let totals = chunk_totals(conn, &mark.path, mark.scope, &mark.mount_point)?;
        conn.execute(
            MARK_COMPLETED_SQL,
            params![
                mark.key,
                mark.mount_point,
                mark.scan_time,
                totals.files as i64,
                totals.bytes as i64
            ],
        )
        .context("mark chunk completed")?;
    } else {
        conn.execute(
            MARK_STARTED_SQL,
            params![mark.key, mark.mount_point, mark.scan_time],
        )
        .context("mark chunk started")?;
    }
    Ok(())
}

/// File count and byte total recorded under one chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkTotals {
    pub files: u64,
    pub bytes: u64,
}

/// Count and sum the file rows under `path` (store form) for `mount`.
/// Range scan on the primary key; `DirectFiles` keeps only rows with no further separator.
pub fn chunk_totals(
    conn: &Connection,
    path: &str,
    scope: ChunkScope,
    mount: &str,
) -> Result<ChunkTotals> {
    let (lo, hi) = subtree_range(path);
    let (files, bytes): (i64, i64) = match scope {
        ChunkScope::Subtree => conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM files \
             WHERE path >= ?1 AND path < ?2 AND mount_point = ?3",
            params![lo, hi, mount],
            |row| Ok((row.get(0)?, row.get(1)?)),
        ),
        ChunkScope::DirectFiles => conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM files \
             WHERE path >= ?1 AND path < ?2 AND mount_point = ?3 \
             AND instr(substr(path, ?4), '/') = 0",
            params![lo, hi, mount, (lo.chars().count() + 1) as i64],
            |row| Ok((row.get(0)?, row.get(1)?)),
        ),
    }
    .context("chunk totals")?;
    Ok(ChunkTotals {
        files: files.max(0) as u64,
        bytes: bytes.max(0) as u64,
    })
}

/// Keys of chunks marked complete for `mount`.
pub fn load_completed_chunks(conn: &Connection, mount: &str) -> Result<HashSet<String>> {
    let mut stmt = conn
        .prepare("SELECT path FROM scanned_dirs WHERE mount_point = ?1 AND complete = 1")
        .context("prepare completed chunks")?;
    let rows = stmt.query_map([mount], |row| row.get::<_, String>(0))?;
    let mut set = HashSet::new();
    for row in rows {
        set.insert(row?);
    }
    Ok(set)
}

/// Every `scanned_dirs` row for `mount`, ordered by path.
pub fn load_chunk_records(conn: &Connection, mount: &str) -> Result<Vec<ChunkRecord>> {
    let mut stmt = conn
        .prepare(
            "SELECT path, mount_point, scan_time, files_count, total_size, complete \
             FROM scanned_dirs WHERE mount_point = ?1 ORDER BY path",
        )
        .context("prepare chunk records")?;
    let rows = stmt.query_map([mount], |row| {
        let files: Option<i64> = row.get(3)?;
        let bytes: Option<i64> = row.get(4)?;
        Ok(ChunkRecord {
            path: row.get(0)?,
            mount_point: row.get(1)?,
            scan_time: row.get(2)?,
            files_count: files.unwrap_or(0).max(0) as u64,
            total_size: bytes.unwrap_or(0).max(0) as u64,
            complete: row.get::<_, i64>(5)? != 0,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Completed chunk count plus file count and bytes for `mount`.
pub fn get_stats(conn: &Connection, mount: &str) -> Result<StoreStats> {
    let chunks: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM scanned_dirs WHERE mount_point = ?1 AND complete = 1",
            [mount],
            |row| row.get(0),
        )
        .context("count chunks")?;
    let (files, bytes): (i64, i64) = conn
        .query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM files WHERE mount_point = ?1",
            [mount],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .context("count files")?;
    Ok(StoreStats {
        chunks: chunks.max(0) as u64,
        files: files.max(0) as u64,
        bytes: bytes.max(0) as u64,
    })
}

/// Every mount name present in the store.
pub fn list_mounts(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT mount_point FROM scanned_dirs UNION SELECT mount_point FROM files \
             ORDER BY mount_point",
        )
        .context("prepare mounts")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn record_run_stats(conn: &Connection, row: &RunStatsRow) -> Result<()> {
    conn.execute(
        UPSERT_RUN_STATS_SQL,
        params![
            row.mount_point,
            row.files_scanned as i64,
            row.bytes_scanned as i64,
            row.start_time,
            row.end_time
        ],
    )
    .context("record run stats")?;
    Ok(())
}

pub fn load_run_stats(conn: &Connection, mount: &str) -> Result<Option<RunStatsRow>> {
    conn.query_row(
        "SELECT mount_point, files_scanned, bytes_scanned, start_time, end_time \
         FROM scan_stats WHERE mount_point = ?1",
        [mount],
        |row| {
            Ok(RunStatsRow {
                mount_point: row.get(0)?,
                files_scanned: row.get::<_, i64>(1)?.max(0) as u64,
                bytes_scanned: row.get::<_, i64>(2)?.max(0) as u64,
                start_time: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                end_time: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
            })
        },
    )
    .optional()
    .context("load run stats")
}

/// Fold the WAL back into the main file. Call once no other process is writing.
pub fn truncate_wal(conn: &Connection) -> Result<()> {
    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
        .context("WAL checkpoint")?;
    Ok(())
}
