//! Error types for stores, turn execution and dispatch.

use crate::types::StorageKey;
use thiserror::Error;

/// Boxed error raised by a conversation state machine.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of a versioned store.
///
/// A version mismatch is never reported through this type; `save` returns
/// `Ok(false)` instead.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid object format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<rmp_serde::encode::Error> for StorageError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StorageError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StorageError::Deserialization(e.to_string())
    }
}

/// Failure delivering an already-committed outbound message.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Dispatch queue is full")]
    Full,

    #[error("Dispatch channel disconnected")]
    Disconnected,

    #[error("Delivery rejected: {0}")]
    Rejected(String),
}

/// Main error type for turn processing.
#[derive(Debug, Error)]
pub enum ScaleoutError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Malformed conversation snapshot: {0}")]
    StateDeserialization(String),

    #[error("Failed to serialize conversation state: {0}")]
    StateSerialization(String),

    #[error("State machine failed: {0}")]
    StateMachine(#[source] BoxError),

    /// State was committed; only the first `delivered` messages went out.
    #[error("Dispatch failed after {delivered} message(s): {source}")]
    Dispatch {
        delivered: usize,
        #[source]
        source: DispatchError,
    },

    #[error("Gave up on {key} after {attempts} conflicting attempt(s)")]
    RetriesExhausted { key: StorageKey, attempts: u32 },
}

/// Result type for turn processing.
pub type Result<T> = std::result::Result<T, ScaleoutError>;

/// Result type for store operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
