//! Path and filesystem helpers

use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Store representation of a path: forward slashes, no trailing separator (except the root itself).
pub fn path_to_db_string(path: &Path) -> String {
    let s = path.to_string_lossy().replace('\\', "/");
    if s.len() > 1 {
        s.trim_end_matches('/').to_string()
    } else {
        s
    }
}

/// Convert absolute path to relative path from base
pub fn path_relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(|p| p.to_path_buf())
}

/// Number of components of `path` below `root` (0 for the root itself).
pub fn depth_below(path: &Path, root: &Path) -> usize {
    path_relative_to(path, root)
        .map(|rel| rel.components().count())
        .unwrap_or(0)
}

/// Key prefix shared by every store path strictly below `key`, and the exclusive upper bound of that range.
/// `"/a/b"` -> (`"/a/b/"`, `"/a/b0"`); `'0'` is the byte after `'/'`.
pub fn subtree_range(key: &str) -> (String, String) {
    let prefix = if key.ends_with('/') {
        key.to_string()
    } else {
        format!("{key}/")
    };
    let mut upper = prefix.clone();
    upper.pop();
    upper.push('0');
    (prefix, upper)
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> f64 {
    system_time_to_unix(SystemTime::now())
}

pub fn system_time_to_unix(t: SystemTime) -> f64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

/// True when the directory has no entries at all. A directory that cannot be listed is an error,
/// never "empty".
pub fn is_empty_directory(path: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

/// Immediate subdirectories of `path`, sorted. Symlinked directories are not followed.
pub fn list_subdirectories(path: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(path)? {
        let Ok(entry) = entry else { continue };
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Count and total size of the regular files directly inside `path`.
pub fn direct_files_summary(path: &Path) -> io::Result<(u64, u64)> {
    let entries = fs::read_dir(path)?;
    let mut count = 0_u64;
    let mut bytes = 0_u64;
    for entry in entries.flatten() {
        if entry.file_type().is_ok_and(|t| t.is_file()) {
            count += 1;
            bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    Ok((count, bytes))
}

/// Keep `[A-Za-z0-9_-]`, map everything else to `_`, and keep at most the last `max_len` characters.
pub fn sanitize_id_component(raw: &str, max_len: usize) -> String {
    let cleaned: Vec<char> = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let start = cleaned.len().saturating_sub(max_len);
    let tail: String = cleaned[start..].iter().collect();
    let trimmed = tail.trim_matches('_');
    if trimmed.is_empty() {
        "root".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Canonicalize the scan root and require it to be a readable directory.
pub fn check_and_canonicalize_root(path: &Path) -> Result<PathBuf> {
    let root = path
        .canonicalize()
        .with_context(|| format!("scan root {} is missing or inaccessible", path.display()))?;
    if !root.is_dir() {
        anyhow::bail!("scan root {} is not a directory", root.display());
    }
    fs::read_dir(&root).with_context(|| format!("cannot list scan root {}", root.display()))?;
    Ok(root)
}
