//! Versioned store over an object backend with conditional writes.

use super::VersionedStore;
use crate::error::{StorageError, StorageResult};
use crate::types::{ETag, StorageKey, VersionedRecord};
use serde_json::Value;

/// An object as returned by a backend read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub etag: ETag,
}

/// Precondition attached to a backend write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PutCondition {
    /// Write only if the object's current tag equals this one.
    IfMatch(ETag),
    /// Write only if the object does not exist (`If-None-Match: *`).
    IfNoneMatch,
}

/// Result of a conditional write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    Written(ETag),
    PreconditionFailed,
}

/// Object storage with a native conditional-write primitive.
///
/// `get` returns `Ok(None)` for a missing object. `put` must evaluate its
/// condition and write atomically with respect to every other writer.
pub trait ObjectBackend: Send + Sync {
    fn get(&self, key: &StorageKey) -> StorageResult<Option<StoredObject>>;

    fn put(&self, key: &StorageKey, body: &[u8], condition: PutCondition)
        -> StorageResult<PutOutcome>;
}

/// [`VersionedStore`] that keeps JSON documents in an [`ObjectBackend`].
///
/// Needs no locking of its own; atomicity comes from the backend's
/// conditional write.
pub struct DurableStore<B> {
    backend: B,
}

impl<B: ObjectBackend> DurableStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: ObjectBackend> VersionedStore for DurableStore<B> {
    fn load(&self, key: &StorageKey) -> StorageResult<VersionedRecord> {
        let Some(object) = self.backend.get(key)? else {
            return Ok(VersionedRecord::absent());
        };

        let value: Value = serde_json::from_slice(&object.body).map_err(|e| {
            StorageError::Corruption(format!("object {key} is not valid JSON: {e}"))
        })?;

        Ok(VersionedRecord::new(value, object.etag))
    }

    fn save(&self, key: &StorageKey, value: &Value, expected: Option<&ETag>) -> StorageResult<bool> {
        let body =
            serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))?;

        let condition = match expected {
            Some(etag) => PutCondition::IfMatch(etag.clone()),
            None => PutCondition::IfNoneMatch,
        };

        match self.backend.put(key, &body, condition)? {
            PutOutcome::Written(etag) => {
                tracing::trace!(%key, %etag, "durable store: object written");
                Ok(true)
            }
            PutOutcome::PreconditionFailed => {
                tracing::debug!(%key, ?expected, "durable store: precondition failed");
                Ok(false)
            }
        }
    }
}
