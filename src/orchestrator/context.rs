//! Per-run state owned by the orchestrator: identity, counters, shutdown flag.

use serde::Serialize;
use std::time::Instant;

use crate::engine::tools::{sanitize_id_component, unix_now};
use crate::types::{Chunk, ChunkScope};
use crate::utils::config::PackagePaths;
use crate::utils::shutdown::ShutdownSignal;

/// Longest sanitized path tail kept in a worker id.
const ID_TAIL_LEN: usize = 40;

/// Attempt counters for one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    /// Dispatch attempts, including ones that failed before a worker started.
    pub total_attempts: u64,
    pub failed_attempts: u64,
    pub launched: u64,
    pub launch_failures: u64,
    pub timeouts: u64,
    pub completed: u64,
    pub abandoned: u64,
}

/// Created at run start, dropped at run end.
pub struct RunContext {
    pub run_id: String,
    pub started: Instant,
    /// Start time in seconds since the Unix epoch.
    pub started_unix: f64,
    pub counters: RunCounters,
    pub shutdown: ShutdownSignal,
    seq: u64,
}

impl RunContext {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        let started_unix = unix_now();
        let run_id = format!(
            "{:x}{:04x}",
            started_unix as u64,
            std::process::id() & 0xffff
        );
        Self {
            run_id,
            started: Instant::now(),
            started_unix,
            counters: RunCounters::default(),
            shutdown,
            seq: 0,
        }
    }

    /// `<pkg>-<run id>-<seq>-<path tail>`, restricted to `[A-Za-z0-9_-]`. Unique within and across runs.
    pub fn next_worker_id(&mut self, chunk: &Chunk) -> String {
        self.seq += 1;
        let name = chunk
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut tail = sanitize_id_component(&name, ID_TAIL_LEN);
        if chunk.scope == ChunkScope::DirectFiles {
            tail.push_str("-files");
        }
        format!(
            "{}-{}-{}-{}",
            PackagePaths::get().worker_prefix(),
            self.run_id,
            self.seq,
            tail
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkKind;
    use std::path::Path;

    #[test]
    fn worker_ids_are_unique_and_clean() {
        let mut ctx = RunContext::new(ShutdownSignal::new());
        let chunk = Chunk::subtree(Path::new("/mnt/My Files (old)"), "m", ChunkKind::TopLevel, 0);
        let a = ctx.next_worker_id(&chunk);
        let b = ctx.next_worker_id(&chunk);
        assert_ne!(a, b);
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert!(a.ends_with("My_Files__old"));
    }
}
