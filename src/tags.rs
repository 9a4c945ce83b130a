//! Tag index
//!
//! Maps a tag to the set of keys that were `set` with it, enabling bulk
//! invalidation. Mutated by many concurrent operations, so the whole index
//! sits behind a read-write lock.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

/// Tag -> key-set index for bulk invalidation
#[derive(Debug, Default)]
pub struct TagIndex {
    tags: RwLock<HashMap<String, HashSet<String>>>,
}

impl TagIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` under each tag
    pub fn insert(&self, key: &str, tags: &HashSet<String>) {
        if tags.is_empty() {
            return;
        }
        let mut index = self.tags.write();
        for tag in tags {
            index
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Keys currently registered under `tag`
    pub fn keys_for(&self, tag: &str) -> Vec<String> {
        self.tags
            .read()
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove `key` from every tag it was registered under, dropping tags
    /// that become empty
    pub fn remove_key(&self, key: &str) {
        let mut index = self.tags.write();
        index.retain(|_, keys| {
            keys.remove(key);
            !keys.is_empty()
        });
    }

    /// Number of distinct tags
    pub fn len(&self) -> usize {
        self.tags.read().len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.tags.read().is_empty()
    }

    /// Reset the index as a whole (cache `clear`)
    pub fn clear(&self) {
        self.tags.write().clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
