//! Planner tests: subdivision, resume filtering, fast mode, adaptive generation from the frontier.

use chunkscan::planner::{
    ChunkPlanner, CompletedSet, Frontier, FrontierOrigin, PlannerOptions,
};
use chunkscan::{Chunk, ChunkKind, ChunkScope, ShutdownSignal, chunk_key};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn write_file(path: &Path, size: usize) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, vec![b'x'; size]).unwrap();
}

fn planner(target: u64) -> ChunkPlanner {
    ChunkPlanner::new(
        PlannerOptions {
            target_chunk_bytes: target,
            max_depth: 4,
            large_tree_files: 1_000_000,
            min_file_count: 10_000,
            probe_timeout: Duration::from_secs(30),
            analysis_timeout: Duration::from_secs(30),
        },
        ShutdownSignal::new(),
    )
}

/// root/{loose.txt, a/{1,2}, b/{1, deep/{1}}, c/1, empty/}
fn fixture() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    write_file(&root.join("loose.txt"), 100);
    write_file(&root.join("a/1.bin"), 1000);
    write_file(&root.join("a/2.bin"), 1000);
    write_file(&root.join("b/1.bin"), 500);
    write_file(&root.join("b/deep/1.bin"), 500);
    write_file(&root.join("c/1.bin"), 300);
    fs::create_dir_all(root.join("empty")).unwrap();
    (dir, root)
}

fn keys(chunks: &[Chunk]) -> HashSet<String> {
    chunks.iter().map(Chunk::key).collect()
}

#[test]
fn test_small_tree_is_one_root_chunk() {
    let (_dir, root) = fixture();
    let chunks = planner(1 << 30)
        .initial_chunks(&root, "m", &CompletedSet::new())
        .unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].path, root);
    assert_eq!(chunks[0].kind, ChunkKind::Root);
    assert_eq!(chunks[0].scope, ChunkScope::Subtree);
    assert_eq!(chunks[0].estimated_size, 3400);
}

#[test]
fn test_oversized_root_is_subdivided_with_loose_files_chunk() {
    let (_dir, root) = fixture();
    let chunks = planner(1500)
        .initial_chunks(&root, "m", &CompletedSet::new())
        .unwrap();

    let expected: HashSet<String> = [
        chunk_key(&root, ChunkScope::DirectFiles),
        chunk_key(&root.join("a"), ChunkScope::Subtree),
        chunk_key(&root.join("b"), ChunkScope::Subtree),
        chunk_key(&root.join("c"), ChunkScope::Subtree),
    ]
    .into_iter()
    .collect();
    assert_eq!(keys(&chunks), expected);

    let loose = chunks.iter().find(|c| c.is_files_only()).unwrap();
    assert_eq!(loose.kind, ChunkKind::Root);
    assert!(loose.key().ends_with("/."));
    // Largest first.
    assert_eq!(chunks[0].path, root.join("a"));
    assert!(chunks.iter().all(|c| c.path != root.join("empty")));
}

#[test]
fn test_replanning_is_disjoint_from_completed() {
    let (_dir, root) = fixture();
    let p = planner(1500);
    let first = p.initial_chunks(&root, "m", &CompletedSet::new()).unwrap();

    let mut done = CompletedSet::new();
    done.insert(chunk_key(&root.join("a"), ChunkScope::Subtree));
    done.insert(chunk_key(&root, ChunkScope::DirectFiles));
    let second = p.initial_chunks(&root, "m", &done).unwrap();

    for c in &second {
        assert!(!done.covers(&c.path, c.scope), "{} re-planned", c.key());
    }
    let remaining: HashSet<String> = keys(&first)
        .into_iter()
        .filter(|k| !done.contains(k))
        .collect();
    assert_eq!(keys(&second), remaining);
}

#[test]
fn test_fully_completed_root_plans_nothing() {
    let (_dir, root) = fixture();
    let mut done = CompletedSet::new();
    done.insert(chunk_key(&root, ChunkScope::Subtree));
    assert!(planner(1).initial_chunks(&root, "m", &done).unwrap().is_empty());
    let mut frontier = Frontier::new();
    assert!(
        planner(1)
            .fast_chunks(&root, "m", &done, &mut frontier)
            .unwrap()
            .is_empty()
    );
    assert!(frontier.is_empty());
}

#[test]
fn test_partially_scanned_directory_is_subdivided() {
    let (_dir, root) = fixture();
    let mut done = CompletedSet::new();
    done.insert(chunk_key(&root.join("b/deep"), ChunkScope::Subtree));
    // Large target: without resume data the root would be one chunk.
    let chunks = planner(1 << 30).initial_chunks(&root, "m", &done).unwrap();
    let k = keys(&chunks);
    assert!(!k.contains(&chunk_key(&root, ChunkScope::Subtree)));
    assert!(!k.contains(&chunk_key(&root.join("b"), ChunkScope::Subtree)));
    assert!(k.contains(&chunk_key(&root.join("b"), ChunkScope::DirectFiles)));
    assert!(k.contains(&chunk_key(&root.join("a"), ChunkScope::Subtree)));
    assert!(!k.contains(&chunk_key(&root.join("b/deep"), ChunkScope::Subtree)));
}

#[test]
fn test_fast_start_queues_top_level_directories_on_frontier() {
    let (_dir, root) = fixture();
    let p = planner(1);
    let mut frontier = Frontier::new();
    let chunks = p
        .fast_chunks(&root, "m", &CompletedSet::new(), &mut frontier)
        .unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].key(), chunk_key(&root, ChunkScope::DirectFiles));
    assert_eq!(chunks[0].kind, ChunkKind::Root);
    // a, b, c; "empty" is not queued.
    assert_eq!(frontier.len(), 3);

    let adaptive = p.adaptive_chunks(&mut frontier, "m", &CompletedSet::new(), 10);
    let expected: HashSet<String> = ["a", "b", "c"]
        .iter()
        .map(|n| chunk_key(&root.join(n), ChunkScope::Subtree))
        .collect();
    assert_eq!(keys(&adaptive), expected);
    assert!(adaptive.iter().all(|c| c.kind == ChunkKind::Adaptive));
    assert!(frontier.is_empty());
}

#[test]
fn test_fast_start_frontier_splits_directories_with_many_files() {
    let (_dir, root) = fixture();
    let p = ChunkPlanner::new(
        PlannerOptions {
            target_chunk_bytes: 1 << 30,
            max_depth: 4,
            large_tree_files: 1_000_000,
            min_file_count: 2,
            probe_timeout: Duration::from_secs(30),
            analysis_timeout: Duration::from_secs(30),
        },
        ShutdownSignal::new(),
    );
    let mut frontier = Frontier::new();
    p.fast_chunks(&root, "m", &CompletedSet::new(), &mut frontier)
        .unwrap();
    let chunks = p.adaptive_chunks(&mut frontier, "m", &CompletedSet::new(), 20);
    let k = keys(&chunks);
    // b holds two files across b/ and b/deep/: split into its loose files and b/deep.
    assert!(k.contains(&chunk_key(&root.join("b"), ChunkScope::DirectFiles)));
    assert!(k.contains(&chunk_key(&root.join("b/deep"), ChunkScope::Subtree)));
    assert!(!k.contains(&chunk_key(&root.join("b"), ChunkScope::Subtree)));
    // c holds one file: one chunk.
    assert!(k.contains(&chunk_key(&root.join("c"), ChunkScope::Subtree)));
    assert!(chunks.iter().all(|c| c.kind == ChunkKind::Adaptive));
}

#[test]
fn test_adaptive_generation_respects_max() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let mut frontier = Frontier::new();
    for name in ["d1", "d2", "d3", "d4", "d5"] {
        write_file(&root.join(name).join("f.txt"), 10);
        frontier.push(&root.join(name), 1, FrontierOrigin::Remaining);
    }
    let p = planner(1 << 30);
    let done = CompletedSet::new();

    let batch = p.adaptive_chunks(&mut frontier, "m", &done, 2);
    assert_eq!(batch.len(), 2);
    assert_eq!(frontier.len(), 3);
    assert!(batch.iter().all(|c| c.kind == ChunkKind::Adaptive));

    let rest = p.adaptive_chunks(&mut frontier, "m", &done, 10);
    assert_eq!(rest.len(), 3);
    assert!(frontier.is_empty());
}

#[test]
fn test_adaptive_skips_completed_and_empty_entries() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    write_file(&root.join("done/f.txt"), 10);
    fs::create_dir_all(root.join("hollow")).unwrap();
    write_file(&root.join("todo/f.txt"), 10);

    let mut frontier = Frontier::new();
    for name in ["done", "hollow", "missing", "todo"] {
        frontier.push(&root.join(name), 1, FrontierOrigin::Remaining);
    }
    let mut completed = CompletedSet::new();
    completed.insert(chunk_key(&root.join("done"), ChunkScope::Subtree));

    let chunks = planner(1 << 30).adaptive_chunks(&mut frontier, "m", &completed, 10);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].path, root.join("todo"));
}

#[test]
fn test_abandoned_directory_is_split_into_emergency_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let big = root.join("big");
    write_file(&big.join("loose.bin"), 10);
    write_file(&big.join("x/1.bin"), 10);
    write_file(&big.join("y/1.bin"), 10);

    let p = planner(1 << 30);
    let done = CompletedSet::new();
    let mut frontier = Frontier::new();
    frontier.push(&big, 1, FrontierOrigin::Abandoned);

    let first = p.adaptive_chunks(&mut frontier, "m", &done, 10);
    // Loose files first; subdirectories go back on the frontier and come out in the same call.
    assert_eq!(first.len(), 3);
    assert!(first.iter().all(|c| c.kind == ChunkKind::Emergency));
    assert!(first.iter().any(|c| c.is_files_only() && c.path == big));
    assert!(!keys(&first).contains(&chunk_key(&big, ChunkScope::Subtree)));
    assert!(frontier.is_empty());
}

#[test]
fn test_abandoned_leaf_is_not_reemitted() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let leaf = root.join("leaf");
    write_file(&leaf.join("1.bin"), 10);

    let mut frontier = Frontier::new();
    frontier.push(&leaf, 1, FrontierOrigin::Abandoned);
    let chunks = planner(1 << 30).adaptive_chunks(&mut frontier, "m", &CompletedSet::new(), 10);
    assert!(chunks.is_empty());
    assert!(frontier.is_empty());
}

fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// root/{open/x.bin, locked/y.bin} with `locked` unreadable. `None` when permission bits do not apply.
fn locked_fixture() -> Option<(tempfile::TempDir, PathBuf)> {
    use std::os::unix::fs::PermissionsExt;
    if running_as_root() {
        eprintln!("running as root; permission bits are not enforced");
        return None;
    }
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    write_file(&root.join("open/x.bin"), 1000);
    write_file(&root.join("locked/y.bin"), 1000);
    fs::set_permissions(root.join("locked"), fs::Permissions::from_mode(0o000)).unwrap();
    Some((dir, root))
}

fn unlock(root: &Path) {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(root.join("locked"), fs::Permissions::from_mode(0o755)).unwrap();
}

#[test]
fn test_unreadable_directory_is_kept_as_leaf_chunk() {
    let Some((_dir, root)) = locked_fixture() else {
        return;
    };
    let p = planner(1);
    let planned = p.initial_chunks(&root, "m", &CompletedSet::new()).unwrap();
    let mut frontier = Frontier::new();
    p.fast_chunks(&root, "m", &CompletedSet::new(), &mut frontier)
        .unwrap();
    let adaptive = p.adaptive_chunks(&mut frontier, "m", &CompletedSet::new(), 10);
    unlock(&root);

    let locked = chunk_key(&root.join("locked"), ChunkScope::Subtree);
    assert!(keys(&planned).contains(&locked));
    assert!(keys(&planned).contains(&chunk_key(&root.join("open"), ChunkScope::Subtree)));
    assert!(keys(&adaptive).contains(&locked));
}
