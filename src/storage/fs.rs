//! File-system object backend.
//!
//! Objects are stored one file per key, sharded by the first byte of the
//! key's SHA-256 (like Git objects). Each object has a sibling `.lock`
//! file; conditional writes hold an exclusive advisory lock on it, so any
//! number of processes can share one root directory.

use super::durable::{ObjectBackend, PutCondition, PutOutcome, StoredObject};
use crate::error::{StorageError, StorageResult};
use crate::types::{ETag, StorageKey, Timestamp};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Magic bytes for the root manifest.
const ROOT_MAGIC: &[u8; 4] = b"SCO\0";

/// Magic bytes for object files.
const OBJECT_MAGIC: &[u8; 4] = b"OBJ\0";

/// Current on-disk format version.
const FORMAT_VERSION: u8 = 1;

/// Upper bound on a single encoded envelope.
const MAX_ENVELOPE_LEN: usize = 64 * 1024 * 1024;

/// Distinguishes manifest temp files written by threads of one process.
static MANIFEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// Backend configuration.
#[derive(Clone, Debug)]
pub struct FsObjectStoreConfig {
    /// Root directory shared by all workers.
    pub path: PathBuf,

    /// Whether to create the root if it doesn't exist.
    pub create_if_missing: bool,

    /// Fsync object files before they replace the previous version.
    pub sync_writes: bool,
}

impl Default for FsObjectStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./scaleout-state"),
            create_if_missing: true,
            sync_writes: true,
        }
    }
}

/// What is actually written to an object file.
#[derive(Serialize, Deserialize)]
struct ObjectEnvelope {
    key: String,
    generation: u64,
    etag: String,
    body: Vec<u8>,
}

/// Object store rooted at a local (or network-mounted) directory.
pub struct FsObjectBackend {
    config: FsObjectStoreConfig,
}

impl FsObjectBackend {
    /// Open an existing root or create a new one.
    pub fn open(config: FsObjectStoreConfig) -> StorageResult<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::verify_manifest(&config.path)?;
        } else if config.create_if_missing {
            fs::create_dir_all(config.path.join("objects"))?;
            Self::write_manifest(&config.path)?;
        } else {
            return Err(StorageError::NotInitialized);
        }

        tracing::debug!(path = %config.path.display(), "opened object store");
        Ok(Self { config })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Location of the object file for `key`.
    pub fn object_path(&self, key: &StorageKey) -> PathBuf {
        let digest = key.digest();
        self.config
            .path
            .join("objects")
            .join(hex::encode(&digest[0..1]))
            .join(hex::encode(digest))
    }

    fn lock_path(object_path: &Path) -> PathBuf {
        object_path.with_extension("lock")
    }

    fn temp_path(object_path: &Path) -> PathBuf {
        object_path.with_extension("tmp")
    }

    fn open_lock(object_path: &Path) -> StorageResult<File> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(Self::lock_path(object_path))?;
        Ok(file)
    }

    fn read_envelope(key: &StorageKey, object_path: &Path) -> StorageResult<Option<ObjectEnvelope>> {
        let mut file = match File::open(object_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != OBJECT_MAGIC {
            return Err(StorageError::InvalidFormat("Invalid object magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != FORMAT_VERSION {
            return Err(StorageError::InvalidFormat(format!(
                "Unsupported object version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 4];
        file.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_ENVELOPE_LEN {
            return Err(StorageError::Corruption(format!(
                "object envelope too large: {len} bytes"
            )));
        }

        let mut encoded = vec![0u8; len];
        file.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&encoded);
        if stored_checksum != computed_checksum {
            return Err(StorageError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        let envelope: ObjectEnvelope = rmp_serde::from_slice(&encoded)?;
        if envelope.key != key.as_str() {
            return Err(StorageError::Corruption(format!(
                "object for {} holds key {}",
                key, envelope.key
            )));
        }

        Ok(Some(envelope))
    }

    fn write_envelope(&self, object_path: &Path, envelope: &ObjectEnvelope) -> StorageResult<()> {
        let encoded = rmp_serde::to_vec(envelope)?;
        let len = u32::try_from(encoded.len())
            .ok()
            .filter(|len| (*len as usize) <= MAX_ENVELOPE_LEN)
            .ok_or_else(|| {
                StorageError::Serialization(format!("object too large: {} bytes", encoded.len()))
            })?;

        let temp_path = Self::temp_path(object_path);
        let mut file = File::create(&temp_path)?;
        file.write_all(OBJECT_MAGIC)?;
        file.write_all(&[FORMAT_VERSION])?;
        file.write_all(&len.to_le_bytes())?;
        file.write_all(&encoded)?;
        file.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;
        if self.config.sync_writes {
            file.sync_all()?;
        }
        drop(file);

        fs::rename(&temp_path, object_path)?;
        Ok(())
    }

    /// Token for a new generation of `key`.
    fn mint_etag(key: &StorageKey, generation: u64, body: &[u8]) -> ETag {
        let mut hasher = Sha256::new();
        hasher.update(key.as_str().as_bytes());
        hasher.update(generation.to_le_bytes());
        hasher.update(Timestamp::now().0.to_le_bytes());
        hasher.update(std::process::id().to_le_bytes());
        hasher.update(body);
        let digest = hasher.finalize();
        ETag::new(format!("{}-{}", generation, hex::encode(&digest[..16])))
    }

    /// Publishes the manifest with a rename so concurrent openers never
    /// observe a partially written file.
    fn write_manifest(path: &Path) -> StorageResult<()> {
        let temp_path = path.join(format!(
            "MANIFEST.{}.{}.tmp",
            std::process::id(),
            MANIFEST_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        let written = (|| -> StorageResult<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(ROOT_MAGIC)?;
            file.write_all(&[FORMAT_VERSION])?;
            file.sync_all()?;
            fs::rename(&temp_path, path.join("MANIFEST"))?;
            Ok(())
        })();

        if written.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        written
    }

    fn verify_manifest(path: &Path) -> StorageResult<()> {
        let mut file = File::open(path.join("MANIFEST"))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != ROOT_MAGIC {
            return Err(StorageError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != FORMAT_VERSION {
            return Err(StorageError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }
}

impl ObjectBackend for FsObjectBackend {
    fn get(&self, key: &StorageKey) -> StorageResult<Option<StoredObject>> {
        let object_path = self.object_path(key);
        if !object_path.exists() {
            return Ok(None);
        }

        let lock = Self::open_lock(&object_path)?;
        lock.lock_shared()?;
        let envelope = Self::read_envelope(key, &object_path);
        lock.unlock()?;

        Ok(envelope?.map(|envelope| StoredObject {
            body: envelope.body,
            etag: ETag::new(envelope.etag),
        }))
    }

    fn put(
        &self,
        key: &StorageKey,
        body: &[u8],
        condition: PutCondition,
    ) -> StorageResult<PutOutcome> {
        let object_path = self.object_path(key);
        if let Some(shard) = object_path.parent() {
            fs::create_dir_all(shard)?;
        }

        let lock = Self::open_lock(&object_path)?;
        lock.lock_exclusive()?;
        let outcome = self.put_locked(key, &object_path, body, condition);
        lock.unlock()?;
        outcome
    }
}

impl FsObjectBackend {
    /// Conditional write; caller holds the object's exclusive lock.
    fn put_locked(
        &self,
        key: &StorageKey,
        object_path: &Path,
        body: &[u8],
        condition: PutCondition,
    ) -> StorageResult<PutOutcome> {
        let current = Self::read_envelope(key, object_path)?;

        let generation = match (&condition, &current) {
            (PutCondition::IfNoneMatch, None) => 1,
            (PutCondition::IfMatch(expected), Some(current))
                if expected.as_str() == current.etag =>
            {
                current.generation + 1
            }
            _ => return Ok(PutOutcome::PreconditionFailed),
        };

        let etag = Self::mint_etag(key, generation, body);
        let envelope = ObjectEnvelope {
            key: key.as_str().to_string(),
            generation,
            etag: etag.as_str().to_string(),
            body: body.to_vec(),
        };
        self.write_envelope(object_path, &envelope)?;

        Ok(PutOutcome::Written(etag))
    }
}
