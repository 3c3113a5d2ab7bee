//! Chunk lifecycle: state tracking and the retry queue.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::types::Chunk;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Pending,
    Active,
    Completed,
    /// Failed, waiting out its backoff before returning to pending.
    RetryWait,
    Abandoned,
}

impl ChunkState {
    fn can_move_to(self, to: ChunkState) -> bool {
        use ChunkState::*;
        matches!(
            (self, to),
            (Pending, Active)
                | (Active, Completed)
                | (Active, RetryWait)
                | (Active, Abandoned)
                | (Active, Pending)
                | (RetryWait, Pending)
        )
    }
}

/// Number of chunks per state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub retry_wait: usize,
    pub abandoned: usize,
}

/// Single authority for chunk state, keyed by chunk key.
#[derive(Debug, Default)]
pub struct ChunkTracker {
    states: HashMap<String, ChunkState>,
}

impl ChunkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `key` as pending. False if the key is already known (in any state).
    pub fn insert_pending(&mut self, key: &str) -> bool {
        if self.states.contains_key(key) {
            return false;
        }
        self.states.insert(key.to_string(), ChunkState::Pending);
        true
    }

    pub fn state(&self, key: &str) -> Option<ChunkState> {
        self.states.get(key).copied()
    }

    pub fn transition(&mut self, key: &str, to: ChunkState) -> Result<()> {
        let Some(from) = self.states.get_mut(key) else {
            anyhow::bail!("untracked chunk {}", key);
        };
        if !from.can_move_to(to) {
            anyhow::bail!("invalid transition {:?} -> {:?} for {}", from, to, key);
        }
        *from = to;
        Ok(())
    }

    pub fn counts(&self) -> StateCounts {
        let mut c = StateCounts::default();
        for s in self.states.values() {
            match s {
                ChunkState::Pending => c.pending += 1,
                ChunkState::Active => c.active += 1,
                ChunkState::Completed => c.completed += 1,
                ChunkState::RetryWait => c.retry_wait += 1,
                ChunkState::Abandoned => c.abandoned += 1,
            }
        }
        c
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// `min(base * 2^retry_count, cap)`.
pub fn backoff_delay(retry_count: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 1_u32.checked_shl(retry_count).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(cap).min(cap)
}

pub struct RetryEntry {
    pub chunk: Chunk,
    /// Failures so far; the next attempt runs with this count.
    pub retry_count: u32,
    pub ready_at: Instant,
}

/// Failed chunks waiting out their backoff. Processed by the main loop, never by recursion.
#[derive(Default)]
pub struct RetryQueue {
    entries: Vec<RetryEntry>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: Chunk, retry_count: u32, ready_at: Instant) {
        self.entries.push(RetryEntry {
            chunk,
            retry_count,
            ready_at,
        });
    }

    /// Remove and return every entry whose backoff has elapsed, earliest first.
    pub fn take_ready(&mut self, now: Instant) -> Vec<RetryEntry> {
        let (mut ready, waiting): (Vec<_>, Vec<_>) =
            self.entries.drain(..).partition(|e| e.ready_at <= now);
        self.entries = waiting;
        ready.sort_by_key(|e| e.ready_at);
        ready
    }

    /// Time until the next entry becomes ready.
    pub fn next_ready_in(&self, now: Instant) -> Option<Duration> {
        self.entries
            .iter()
            .map(|e| e.ready_at.saturating_duration_since(now))
            .min()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(10);
        let waits: Vec<u64> = (0..6)
            .map(|n| backoff_delay(n, base, cap).as_secs())
            .collect();
        assert_eq!(waits, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(backoff_delay(200, base, cap), cap);
    }

    #[test]
    fn tracker_rejects_invalid_transitions() {
        let mut t = ChunkTracker::new();
        assert!(t.insert_pending("/a"));
        assert!(!t.insert_pending("/a"));
        assert!(t.transition("/a", ChunkState::Completed).is_err());
        t.transition("/a", ChunkState::Active).unwrap();
        t.transition("/a", ChunkState::RetryWait).unwrap();
        t.transition("/a", ChunkState::Pending).unwrap();
        t.transition("/a", ChunkState::Active).unwrap();
        t.transition("/a", ChunkState::Abandoned).unwrap();
        assert!(t.transition("/a", ChunkState::Pending).is_err());
        assert_eq!(t.counts().abandoned, 1);
    }

    #[test]
    fn retry_queue_releases_only_ready_entries() {
        use crate::types::ChunkKind;
        use std::path::Path;
        let now = Instant::now();
        let mut q = RetryQueue::new();
        let c = Chunk::subtree(Path::new("/x"), "m", ChunkKind::TopLevel, 0);
        q.push(c.clone(), 1, now);
        q.push(c, 2, now + Duration::from_secs(60));
        let ready = q.take_ready(now);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].retry_count, 1);
        assert_eq!(q.len(), 1);
        assert!(q.next_ready_in(now).unwrap() > Duration::from_secs(59));
    }
}
