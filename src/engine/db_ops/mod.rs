//! Checkpoint store: schema, connections, the single writer thread and the store facade.

mod connection;
mod store;
mod writer;

pub use connection::{
    ChunkTotals, apply_chunk_mark, chunk_totals, get_stats, list_mounts, load_chunk_records,
    load_completed_chunks, load_run_stats, open_db, open_db_in_memory, open_db_with_timeout,
    record_run_stats, truncate_wal, upsert_file_batch,
};
pub use store::{CheckpointStore, StoreOptions};
pub use writer::{ChunkMark, RecordSender, RunStatsRow, WriterSummary};

/// WAL tuning pragmas (synchronous, autocheckpoint, size limit). Use after PRAGMA journal_mode = WAL.
pub(crate) const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 10000;
        PRAGMA journal_size_limit = 67108864;
        PRAGMA temp_store = MEMORY;
        PRAGMA cache_size = -64000;
        "#;

/// Upsert one observed file. Re-scans converge on `(path, mount_point)`.
pub(crate) const UPSERT_FILE_SQL: &str = r#"
INSERT INTO files (path, mount_point, size, mtime, checksum, file_type, extension, scan_time)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
ON CONFLICT(path, mount_point) DO UPDATE SET
    size = excluded.size,
    mtime = excluded.mtime,
    checksum = excluded.checksum,
    file_type = excluded.file_type,
    extension = excluded.extension,
    scan_time = excluded.scan_time
"#;

/// In-flight marker. Never downgrades a completed row.
pub(crate) const MARK_STARTED_SQL: &str = r#"
INSERT INTO scanned_dirs (path, mount_point, scan_time, files_count, total_size, complete)
VALUES (?1, ?2, ?3, 0, 0, 0)
ON CONFLICT(path) DO UPDATE SET
    mount_point = excluded.mount_point,
    scan_time = excluded.scan_time
WHERE scanned_dirs.complete = 0
"#;

pub(crate) const MARK_COMPLETED_SQL: &str = r#"
INSERT INTO scanned_dirs (path, mount_point, scan_time, files_count, total_size, complete)
VALUES (?1, ?2, ?3, ?4, ?5, 1)
ON CONFLICT(path) DO UPDATE SET
    mount_point = excluded.mount_point,
    scan_time = excluded.scan_time,
    files_count = excluded.files_count,
    total_size = excluded.total_size,
    complete = 1
"#;

pub(crate) const UPSERT_RUN_STATS_SQL: &str = r#"
INSERT INTO scan_stats (mount_point, files_scanned, bytes_scanned, start_time, end_time)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(mount_point) DO UPDATE SET
    files_scanned = excluded.files_scanned,
    bytes_scanned = excluded.bytes_scanned,
    start_time = excluded.start_time,
    end_time = excluded.end_time
"#;

/// Schema for files, scanned_dirs and scan_stats tables.
pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    path TEXT NOT NULL,
    mount_point TEXT NOT NULL,
    size INTEGER NOT NULL,
    mtime REAL,
    checksum TEXT,
    file_type TEXT,
    extension TEXT,
    scan_time REAL NOT NULL,
    PRIMARY KEY (path, mount_point)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_files_mount ON files(mount_point);
CREATE INDEX IF NOT EXISTS idx_files_scan_time ON files(scan_time);

CREATE TABLE IF NOT EXISTS scanned_dirs (
    path TEXT PRIMARY KEY,
    mount_point TEXT NOT NULL,
    scan_time REAL NOT NULL,
    files_count INTEGER DEFAULT 0,
    total_size INTEGER DEFAULT 0,
    complete INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_scanned_dirs_mount ON scanned_dirs(mount_point);
CREATE INDEX IF NOT EXISTS idx_scanned_dirs_scan_time ON scanned_dirs(scan_time);

CREATE TABLE IF NOT EXISTS scan_stats (
    mount_point TEXT PRIMARY KEY,
    files_scanned INTEGER NOT NULL DEFAULT 0,
    bytes_scanned INTEGER NOT NULL DEFAULT 0,
    start_time REAL,
    end_time REAL
);
"#;
