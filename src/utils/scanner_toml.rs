//! Load `.chunkscan.toml` (CLI only). Library callers build a [`RunConfig`] directly.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{LauncherKind, RunConfig};
use crate::utils::config::PackagePaths;

#[derive(Debug, Default, Deserialize)]
pub struct ScannerToml {
    #[serde(default)]
    settings: SettingsSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsSection {
    mount_name: Option<String>,
    db_path: Option<String>,
    max_workers: Option<usize>,
    launcher: Option<LauncherKind>,
    image: Option<String>,
    container_runtime: Option<String>,
    host_store_dir: Option<String>,
    worker_exe: Option<String>,
    target_chunk_bytes: Option<u64>,
    analysis_timeout_secs: Option<u64>,
    probe_timeout_secs: Option<u64>,
    fast_start: Option<bool>,
    max_depth: Option<usize>,
    large_tree_files: Option<u64>,
    min_file_count: Option<u64>,
    adaptive_batch: Option<usize>,
    worker_concurrency: Option<usize>,
    worker_cpus: Option<f64>,
    worker_memory_bytes: Option<u64>,
    max_runtime_secs: Option<u64>,
    max_retries: Option<u32>,
    backoff_base_secs: Option<u64>,
    backoff_cap_secs: Option<u64>,
    poll_interval_secs: Option<u64>,
    status_interval_secs: Option<u64>,
    batch_size: Option<usize>,
    flush_interval_secs: Option<u64>,
    report_path: Option<String>,
    verbose: Option<bool>,
}

/// Load settings from `explicit`, or from `.chunkscan.toml` in the current directory.
/// None when the file is missing; unreadable or invalid files are logged and ignored.
pub fn load_scanner_toml(explicit: Option<&Path>) -> Option<ScannerToml> {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(PackagePaths::get().config_filename()));
    let s = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            if explicit.is_some() {
                log::warn!("{}: {}", path.display(), e);
            }
            return None;
        }
    };
    toml::from_str(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

/// Overwrite a config field from the file when present.
macro_rules! apply_file_opt {
    ($file:expr, $cfg:expr, $field:ident) => {
        if let Some(v) = $file.$field.clone() {
            $cfg.$field = v;
        }
    };
    ($file:expr, $cfg:expr, $file_field:ident => $cfg_field:ident, $map:expr) => {
        if let Some(v) = $file.$file_field.clone() {
            $cfg.$cfg_field = $map(v);
        }
    };
}

/// Apply file settings to `config` (only fields present in the file). Call before applying flags.
pub fn apply_file_to_config(file: &ScannerToml, config: &mut RunConfig) {
    let s = &file.settings;
    let secs = Duration::from_secs;
    apply_file_opt!(s, config, mount_name);
    apply_file_opt!(s, config, db_path => db_path, PathBuf::from);
    apply_file_opt!(s, config, max_workers);
    apply_file_opt!(s, config, launcher);
    apply_file_opt!(s, config, image);
    apply_file_opt!(s, config, container_runtime);
    apply_file_opt!(s, config, host_store_dir => host_store_dir, |p: String| Some(PathBuf::from(p)));
    apply_file_opt!(s, config, worker_exe => worker_exe, |p: String| Some(PathBuf::from(p)));
    apply_file_opt!(s, config, target_chunk_bytes);
    apply_file_opt!(s, config, analysis_timeout_secs => analysis_timeout, secs);
    apply_file_opt!(s, config, probe_timeout_secs => probe_timeout, secs);
    apply_file_opt!(s, config, fast_start);
    apply_file_opt!(s, config, max_depth);
    apply_file_opt!(s, config, large_tree_files);
    apply_file_opt!(s, config, min_file_count);
    apply_file_opt!(s, config, adaptive_batch);
    apply_file_opt!(s, config, worker_concurrency);
    apply_file_opt!(s, config, worker_cpus => worker_cpus, Some);
    apply_file_opt!(s, config, worker_memory_bytes => worker_memory_bytes, Some);
    apply_file_opt!(s, config, max_runtime_secs => max_runtime, secs);
    apply_file_opt!(s, config, max_retries);
    apply_file_opt!(s, config, backoff_base_secs => backoff_base, secs);
    apply_file_opt!(s, config, backoff_cap_secs => backoff_cap, secs);
    apply_file_opt!(s, config, poll_interval_secs => poll_interval, secs);
    apply_file_opt!(s, config, status_interval_secs => status_interval, secs);
    apply_file_opt!(s, config, batch_size);
    apply_file_opt!(s, config, flush_interval_secs => flush_interval, secs);
    apply_file_opt!(s, config, report_path => report_path, |p: String| Some(PathBuf::from(p)));
    apply_file_opt!(s, config, verbose);
}
