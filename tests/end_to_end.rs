//! End-to-end: real subprocess workers (this crate's binary) scanning a fixture tree, a partial rescan,
//! and a run interrupted mid-scan then resumed.

use chunkscan::engine::db_ops::open_db;
use chunkscan::engine::hashing::sample_offsets;
use chunkscan::utils::config::HashingConsts;
use chunkscan::{LauncherKind, RunConfig, ShutdownSignal, run};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

const MIB: usize = 1024 * 1024;
const SUBDIRS: [&str; 3] = ["alpha", "beta", "gamma"];

fn large_content(seed: u8) -> Vec<u8> {
    (0..15 * MIB)
        .map(|i| ((i as u64 * 131 + seed as u64 * 7) % 253) as u8)
        .collect()
}

/// 3 subdirectories, each with 3 files of 100 bytes and one 15 MiB file, distinct per subdirectory.
fn fixture(root: &Path) {
    for (n, name) in SUBDIRS.iter().enumerate() {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..3 {
            fs::write(dir.join(format!("small{i}.txt")), vec![b'a' + n as u8 + i; 100]).unwrap();
        }
        fs::write(dir.join("large.bin"), large_content(n as u8)).unwrap();
    }
}

fn config(root: &Path, db: &Path) -> RunConfig {
    RunConfig {
        root: root.to_path_buf(),
        mount_name: "fixture".to_string(),
        db_path: db.to_path_buf(),
        max_workers: 2,
        launcher: LauncherKind::Subprocess,
        worker_exe: Some(PathBuf::from(env!("CARGO_BIN_EXE_chunkscan"))),
        target_chunk_bytes: 20 * MIB as u64,
        worker_concurrency: 2,
        worker_cpus: Some(2.0),
        worker_memory_bytes: Some(8 << 30),
        poll_interval: Duration::from_millis(50),
        max_runtime: Duration::from_secs(120),
        backoff_base: Duration::from_millis(100),
        ..RunConfig::default()
    }
}

type FileRow = (String, i64, f64, String, f64);

fn file_rows(db: &Path) -> Vec<FileRow> {
    let conn = open_db(db).unwrap();
    let mut stmt = conn
        .prepare("SELECT path, size, mtime, checksum, scan_time FROM files ORDER BY path")
        .unwrap();
    stmt.query_map([], |r| {
        Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
    })
    .unwrap()
    .map(|r| r.unwrap())
    .collect()
}

fn count(db: &Path, table: &str) -> i64 {
    open_db(db)
        .unwrap()
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        .unwrap()
}

fn sampled_fingerprint(content: &[u8]) -> String {
    let window = HashingConsts::SAMPLE_SIZE as usize;
    let mut h = blake3::Hasher::new();
    for offset in sample_offsets(content.len() as u64) {
        let o = offset as usize;
        h.update(&content[o..o + window]);
    }
    h.finalize().to_hex().to_string()
}

#[test]
fn test_full_run_then_rescan_of_one_deleted_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap().join("tree");
    fixture(&root);
    let db = dir.path().join("state").join("scan.db");
    let cfg = config(&root, &db);

    let report = run(&cfg, ShutdownSignal::new()).unwrap();
    assert_eq!(report.completed, 3, "{:?}", report.abandoned);
    assert!(report.abandoned.is_empty());
    assert_eq!(count(&db, "scanned_dirs"), 3);
    assert_eq!(count(&db, "files"), 12);
    assert_eq!(report.store.files, 12);

    let rows = file_rows(&db);
    for (n, name) in SUBDIRS.iter().enumerate() {
        let suffix = format!("/{name}/large.bin");
        let row = rows.iter().find(|r| r.0.ends_with(&suffix)).unwrap();
        assert_eq!(row.3, sampled_fingerprint(&large_content(n as u8)));
    }

    // Forget one chunk; only its subtree is scanned again.
    let beta = chunkscan::chunk_key(&root.join("beta"), chunkscan::ChunkScope::Subtree);
    open_db(&db)
        .unwrap()
        .execute("DELETE FROM scanned_dirs WHERE path = ?1", [&beta])
        .unwrap();
    std::thread::sleep(Duration::from_millis(20));

    let report = run(&cfg, ShutdownSignal::new()).unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.total_attempts, 1);
    assert_eq!(count(&db, "scanned_dirs"), 3);
    assert_eq!(count(&db, "files"), 12);

    let after = file_rows(&db);
    let untouched = |r: &&FileRow| !r.0.contains("/beta/");
    let before_other: Vec<&FileRow> = rows.iter().filter(untouched).collect();
    let after_other: Vec<&FileRow> = after.iter().filter(untouched).collect();
    assert_eq!(before_other.len(), 8);
    assert_eq!(before_other, after_other);

    let rescanned = |rs: &[FileRow]| -> Vec<f64> {
        rs.iter()
            .filter(|r| r.0.contains("/beta/"))
            .map(|r| r.4)
            .collect()
    };
    assert!(
        rescanned(&rows[..])
            .iter()
            .zip(rescanned(&after[..]))
            .all(|(old, new)| new > *old)
    );
}

#[test]
fn test_stats_row_recorded_per_run() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap().join("tree");
    fs::create_dir_all(root.join("only")).unwrap();
    fs::write(root.join("only/file.txt"), b"hello").unwrap();
    let db = dir.path().join("scan.db");

    run(&config(&root, &db), ShutdownSignal::new()).unwrap();
    let conn = open_db(&db).unwrap();
    let run_stats = chunkscan::engine::db_ops::load_run_stats(&conn, "fixture")
        .unwrap()
        .unwrap();
    assert_eq!(run_stats.files_scanned, 1);
    assert_eq!(run_stats.bytes_scanned, 5);
    assert!(run_stats.end_time >= run_stats.start_time);
}

/// `count` subdirectories of `per_dir` small files each: several store batches per chunk.
fn many_files_fixture(root: &Path, count: usize, per_dir: usize) {
    for d in 0..count {
        let dir = root.join(format!("d{d}"));
        fs::create_dir_all(&dir).unwrap();
        for i in 0..per_dir {
            fs::write(dir.join(format!("f{i:05}.txt")), format!("{d}:{i}").repeat(8)).unwrap();
        }
    }
}

fn distinct_files(db: &Path) -> i64 {
    open_db(db)
        .unwrap()
        .query_row("SELECT COUNT(DISTINCT path) FROM files", [], |r| r.get(0))
        .unwrap()
}

#[test]
fn test_interrupted_run_resumes_to_same_file_set() {
    const DIRS: usize = 4;
    const PER_DIR: usize = 4000;
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap().join("tree");
    many_files_fixture(&root, DIRS, PER_DIR);

    // Uninterrupted reference run.
    let reference_db = dir.path().join("reference.db");
    let mut reference_cfg = config(&root, &reference_db);
    reference_cfg.target_chunk_bytes = 100_000;
    let report = run(&reference_cfg, ShutdownSignal::new()).unwrap();
    assert_eq!(report.completed, DIRS);
    let expected = distinct_files(&reference_db);
    assert_eq!(expected, (DIRS * PER_DIR) as i64);

    // Cancel as soon as the first worker batch lands in the store.
    let db = dir.path().join("interrupted.db");
    let mut cfg = config(&root, &db);
    cfg.target_chunk_bytes = 100_000;
    let shutdown = ShutdownSignal::new();
    let trigger = shutdown.clone();
    let watched = db.clone();
    let watcher = thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(120);
        while Instant::now() < deadline {
            let seen = watched.exists()
                && open_db(&watched)
                    .ok()
                    .and_then(|c| {
                        c.query_row("SELECT COUNT(*) FROM files", [], |r| r.get::<_, i64>(0))
                            .ok()
                    })
                    .is_some_and(|n| n > 0);
            if seen {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        trigger.trigger();
    });
    let first = run(&cfg, shutdown).unwrap();
    watcher.join().unwrap();

    assert!(first.cancelled);
    assert!(first.completed < DIRS);
    assert!(first.pending > 0);
    assert!(distinct_files(&db) < expected);

    let second = run(&cfg, ShutdownSignal::new()).unwrap();
    assert!(!second.cancelled);
    assert!(second.abandoned.is_empty());
    assert_eq!(first.completed + second.completed, DIRS);
    assert_eq!(count(&db, "scanned_dirs"), DIRS as i64);
    assert_eq!(distinct_files(&db), expected);
    assert_eq!(count(&db, "files"), expected);
}
