//! Scan worker tests: fingerprints, classification, and a full worker run into a store.

use chunkscan::engine::category::categorize;
use chunkscan::engine::db_ops::{load_chunk_records, open_db};
use chunkscan::engine::hashing::{fingerprint_file, sample_offsets};
use chunkscan::pipeline::{path_to_record, run_scan_worker};
use chunkscan::utils::config::HashingConsts;
use chunkscan::{ScanRequest, chunk_key};
use std::fs;
use std::os::unix::fs::FileExt;
use std::path::Path;

const MIB: usize = 1024 * 1024;

/// Deterministic, position-dependent content so every window differs.
fn patterned(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i as u64 * 31 + seed as u64) % 251) as u8)
        .collect()
}

fn patch_byte(path: &Path, offset: u64) {
    let f = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .unwrap();
    let mut b = [0u8; 1];
    f.read_exact_at(&mut b, offset).unwrap();
    f.write_all_at(&[b[0].wrapping_add(1)], offset).unwrap();
}

fn fingerprint(path: &Path) -> String {
    let size = fs::metadata(path).unwrap().len();
    fingerprint_file(path, size).unwrap()
}

#[test]
fn test_fingerprint_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.bin");
    let b = dir.path().join("b.bin");
    fs::write(&a, patterned(200_000, 1)).unwrap();
    fs::write(&b, patterned(200_000, 1)).unwrap();
    assert_eq!(fingerprint(&a), fingerprint(&a));
    assert_eq!(fingerprint(&a), fingerprint(&b));
    assert_eq!(
        fingerprint(&a),
        blake3::hash(&patterned(200_000, 1)).to_hex().to_string()
    );
}

#[test]
fn test_empty_file_gets_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("empty");
    fs::write(&p, b"").unwrap();
    assert_eq!(fingerprint(&p), HashingConsts::EMPTY_SENTINEL);
}

#[test]
fn test_small_file_change_anywhere_changes_fingerprint() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("small.bin");
    fs::write(&p, patterned(5 * MIB, 3)).unwrap();
    let before = fingerprint(&p);
    patch_byte(&p, (2 * MIB + 12345) as u64);
    assert_ne!(fingerprint(&p), before);
}

#[test]
fn test_large_file_hashes_three_samples_only() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("large.bin");
    let content = patterned(15 * MIB, 7);
    fs::write(&p, &content).unwrap();
    let size = content.len() as u64;
    let window = HashingConsts::SAMPLE_SIZE as usize;

    let mut expected = blake3::Hasher::new();
    for offset in sample_offsets(size) {
        let o = offset as usize;
        expected.update(&content[o..o + window]);
    }
    let before = fingerprint(&p);
    assert_eq!(before, expected.finalize().to_hex().to_string());

    // Between the head and middle windows: not sampled.
    patch_byte(&p, size / 4);
    assert_eq!(fingerprint(&p), before);

    // Inside the middle window.
    patch_byte(&p, size / 2 + 100);
    let after_middle = fingerprint(&p);
    assert_ne!(after_middle, before);

    // Inside the tail window.
    patch_byte(&p, size - 1);
    assert_ne!(fingerprint(&p), after_middle);
}

#[test]
fn test_classification_by_lowercase_extension() {
    assert_eq!(
        categorize(Path::new("/x/IMG_001.JPG")),
        ("photos", ".jpg".to_string())
    );
    assert_eq!(
        categorize(Path::new("/x/song.flac")),
        ("music", ".flac".to_string())
    );
    assert_eq!(
        categorize(Path::new("/x/disk.iso")),
        ("disk_images", ".iso".to_string())
    );
    assert_eq!(
        categorize(Path::new("/x/notes.md")),
        ("other", ".md".to_string())
    );
    assert_eq!(categorize(Path::new("/x/Makefile")), ("other", String::new()));
}

#[test]
fn test_path_to_record_skips_symlinks() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("real.txt");
    fs::write(&target, b"hello").unwrap();
    let link = dir.path().join("link.txt");
    std::os::unix::fs::symlink(&target, &link).unwrap();

    assert!(path_to_record(&link, "m").unwrap().is_none());
    let rec = path_to_record(&target, "m").unwrap().unwrap();
    assert_eq!(rec.size, 5);
    assert_eq!(rec.file_type, "documents");
    assert_eq!(rec.extension, ".txt");
    assert!(path_to_record(&dir.path().join("gone"), "m").is_err());
}

fn fixture(root: &Path) {
    fs::create_dir_all(root.join("sub/deeper")).unwrap();
    fs::write(root.join("a.txt"), b"alpha").unwrap();
    fs::write(root.join("photo.PNG"), patterned(1000, 2)).unwrap();
    fs::write(root.join("empty.dat"), b"").unwrap();
    fs::write(root.join("sub/b.pdf"), b"beta").unwrap();
    fs::write(root.join("sub/deeper/c.zip"), b"gamma").unwrap();
    std::os::unix::fs::symlink(root.join("a.txt"), root.join("alias.txt")).unwrap();
}

fn stored_paths(db: &Path) -> Vec<String> {
    let conn = open_db(db).unwrap();
    let mut stmt = conn.prepare("SELECT path FROM files ORDER BY path").unwrap();
    stmt.query_map([], |r| r.get::<_, String>(0))
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
}

#[test]
fn test_worker_records_every_file_under_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap().join("tree");
    fixture(&root);
    let db = dir.path().join("scan.db");

    let mut req = ScanRequest::new(&root, "m", &db);
    req.concurrency = 3;
    let summary = run_scan_worker(&req).unwrap();
    assert_eq!(summary.files, 5);
    assert_eq!(summary.bytes, 5 + 1000 + 4 + 5);
    assert!(summary.is_full_success());

    let paths = stored_paths(&db);
    assert_eq!(paths.len(), 5);
    assert!(paths.iter().all(|p| !p.ends_with("alias.txt")));

    let conn = open_db(&db).unwrap();
    let (kind, sum): (String, String) = conn
        .query_row(
            "SELECT file_type, checksum FROM files WHERE path LIKE '%empty.dat'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!((kind.as_str(), sum.as_str()), ("other", "empty"));
    // The worker never writes chunk markers; the orchestrator does.
    assert!(load_chunk_records(&conn, "m").unwrap().is_empty());

    // Re-running the same chunk converges on the same rows.
    run_scan_worker(&req).unwrap();
    assert_eq!(stored_paths(&db), paths);
}

#[test]
fn test_worker_files_only_skips_subdirectories() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap().join("tree");
    fixture(&root);
    let db = dir.path().join("scan.db");

    let mut req = ScanRequest::new(&root, "m", &db);
    req.files_only = true;
    let summary = run_scan_worker(&req).unwrap();
    assert_eq!(summary.files, 3);
    assert!(
        stored_paths(&db)
            .iter()
            .all(|p| !p.contains("/sub/"))
    );
    assert!(chunk_key(&root, chunkscan::ChunkScope::DirectFiles).ends_with("tree/."));
}

#[test]
fn test_worker_fails_on_missing_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let req = ScanRequest::new(&dir.path().join("nope"), "m", &dir.path().join("scan.db"));
    assert!(run_scan_worker(&req).is_err());
}

#[test]
fn test_worker_skips_non_utf8_names_instead_of_merging_rows() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap().join("tree");
    fs::create_dir_all(&root).unwrap();
    // Both names decode lossily to "caf\u{FFFD}.txt".
    fs::write(root.join(OsStr::from_bytes(b"caf\xe9.txt")), b"latin-1").unwrap();
    fs::write(root.join(OsStr::from_bytes(b"caf\xff.txt")), b"other").unwrap();
    fs::write(root.join("plain.txt"), b"ok").unwrap();
    let db = dir.path().join("scan.db");

    let summary = run_scan_worker(&ScanRequest::new(&root, "m", &db)).unwrap();
    assert_eq!(summary.files, 1);
    assert_eq!(summary.skipped, 2);
    let paths = stored_paths(&db);
    assert_eq!(paths.len(), 1);
    assert!(paths[0].ends_with("/plain.txt"));
    assert!(paths.iter().all(|p| !p.contains('\u{FFFD}')));
}
