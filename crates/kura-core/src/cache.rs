//! # Fast Lookup Cache
//!
//! In-memory `id -> AssetRecord` map owned by the library manager. It holds
//! nothing the record store lacks and can be rebuilt from it at any time.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::types::{AssetId, AssetRecord};

/// Process-local record cache. Reads never block each other.
#[derive(Debug, Default)]
pub struct AssetCache {
    entries: RwLock<HashMap<AssetId, AssetRecord>>,
}

// A poisoned lock only means a writer panicked mid-insert; the map itself is
// still a valid (possibly stale) cache, and staleness is repaired by reloads.
impl AssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, record: AssetRecord) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id, record);
    }

    pub fn get(&self, id: AssetId) -> Option<AssetRecord> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn delete(&self, id: AssetId) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Replace the whole cache with `records`.
    pub fn load_all(&self, records: impl IntoIterator<Item = AssetRecord>) {
        let fresh: HashMap<_, _> = records.into_iter().map(|r| (r.id, r)).collect();
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = fresh;
    }

    pub fn contains(&self, id: AssetId) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every cached id, ascending.
    pub fn ids(&self) -> Vec<AssetId> {
        let mut ids: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }
}
