//! Resume set: which chunk keys are already complete for a mount.

use std::collections::{BTreeSet, HashSet};
use std::ops::Bound;
use std::path::Path;

use crate::engine::tools::{path_to_db_string, subtree_range};
use crate::types::{ChunkScope, chunk_key};

/// Completed chunk keys, ordered so descendant lookups are a range scan.
#[derive(Clone, Debug, Default)]
pub struct CompletedSet {
    keys: BTreeSet<String>,
}

impl From<HashSet<String>> for CompletedSet {
    fn from(keys: HashSet<String>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }
}

impl CompletedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String) {
        self.keys.insert(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// True when the chunk `(path, scope)` needs no work: its own key is complete,
    /// or the subtree key of `path` or any ancestor is.
    pub fn covers(&self, path: &Path, scope: ChunkScope) -> bool {
        if self.contains(&chunk_key(path, scope)) {
            return true;
        }
        path.ancestors()
            .any(|p| self.contains(&path_to_db_string(p)))
    }

    /// True when some key strictly below `dir` is complete (including its direct-files key).
    pub fn has_completed_descendants(&self, dir: &Path) -> bool {
        let (lo, hi) = subtree_range(&path_to_db_string(dir));
        self.keys
            .range::<str, _>((Bound::Included(lo.as_str()), Bound::Excluded(hi.as_str())))
            .next()
            .is_some()
    }
}
