//! In-memory index of tracked private conversations.

use std::collections::HashSet;

use crate::database::models::PmKey;

/// Set of `(window, nick)` pairs already present in `pm_table`.
///
/// Owned by the drain loop; never shared across tasks.
#[derive(Debug, Default)]
pub struct PmDedupIndex {
    keys: HashSet<PmKey>,
}

impl PmDedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add persisted keys, typically once at startup.
    pub fn seed(&mut self, keys: impl IntoIterator<Item = PmKey>) {
        self.keys.extend(keys);
    }

    pub fn contains(&self, key: &PmKey) -> bool {
        self.keys.contains(key)
    }

    /// Remember a key. Call only once the row is known to exist in the store.
    pub fn record(&mut self, key: PmKey) -> bool {
        self.keys.insert(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
