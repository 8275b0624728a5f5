//! Versioned key/value stores with compare-and-swap writes.
//!
//! Every backend implements [`VersionedStore`]. A save only lands when the
//! caller's expected token matches the one currently stored, and every
//! successful save mints a token never used before for that key. A lost
//! race is reported as `Ok(false)`, never as an error.

mod durable;
mod fs;
mod memory;

pub use durable::{DurableStore, ObjectBackend, PutCondition, PutOutcome, StoredObject};
pub use fs::{FsObjectBackend, FsObjectStoreConfig};
pub use memory::MemoryStore;

use crate::error::StorageResult;
use crate::types::{ETag, StorageKey, VersionedRecord};
use serde_json::Value;
use std::sync::Arc;

/// Key/value store with optimistic concurrency.
pub trait VersionedStore: Send + Sync {
    /// Load the record for `key`. A missing key yields
    /// [`VersionedRecord::absent`].
    fn load(&self, key: &StorageKey) -> StorageResult<VersionedRecord>;

    /// Write `value` if the stored token equals `expected`.
    ///
    /// `expected = None` only succeeds when the key does not exist yet.
    fn save(&self, key: &StorageKey, value: &Value, expected: Option<&ETag>) -> StorageResult<bool>;
}

impl<S: VersionedStore + ?Sized> VersionedStore for Arc<S> {
    fn load(&self, key: &StorageKey) -> StorageResult<VersionedRecord> {
        (**self).load(key)
    }

    fn save(&self, key: &StorageKey, value: &Value, expected: Option<&ETag>) -> StorageResult<bool> {
        (**self).save(key, value, expected)
    }
}

impl<S: VersionedStore + ?Sized> VersionedStore for &S {
    fn load(&self, key: &StorageKey) -> StorageResult<VersionedRecord> {
        (**self).load(key)
    }

    fn save(&self, key: &StorageKey, value: &Value, expected: Option<&ETag>) -> StorageResult<bool> {
        (**self).save(key, value, expected)
    }
}
