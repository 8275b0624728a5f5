//! In-memory versioned store.

use super::VersionedStore;
use crate::error::StorageResult;
use crate::types::{ETag, StorageKey, VersionedRecord};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

struct Inner {
    records: HashMap<StorageKey, (Value, ETag)>,
    /// Last generation handed out; tokens are derived from it.
    generation: u64,
}

/// Single-process store for tests and local runs.
///
/// The whole map sits behind one mutex, so check-and-set is trivially
/// atomic. The lock never escapes this type.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: HashMap::new(),
                generation: 0,
            }),
        }
    }

    /// Number of keys written so far.
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionedStore for MemoryStore {
    fn load(&self, key: &StorageKey) -> StorageResult<VersionedRecord> {
        let inner = self.inner.lock();
        Ok(match inner.records.get(key) {
            Some((value, etag)) => VersionedRecord::new(value.clone(), etag.clone()),
            None => VersionedRecord::absent(),
        })
    }

    fn save(&self, key: &StorageKey, value: &Value, expected: Option<&ETag>) -> StorageResult<bool> {
        let mut inner = self.inner.lock();

        let current = inner.records.get(key).map(|(_, etag)| etag);
        if current != expected {
            tracing::trace!(%key, ?expected, ?current, "memory store: token mismatch");
            return Ok(false);
        }

        inner.generation += 1;
        let etag = ETag::new(format!("{:016x}", inner.generation));
        inner.records.insert(key.clone(), (value.clone(), etag));
        Ok(true)
    }
}
