//! Core value types shared by stores, the turn host and the processor.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identity of a single conversation on a single channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationRef {
    pub channel_id: String,
    pub conversation_id: String,
}

impl ConversationRef {
    pub fn new(channel_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            conversation_id: conversation_id.into(),
        }
    }
}

/// Address of one versioned record.
///
/// Derived deterministically from a [`ConversationRef`], so every worker
/// handling the same conversation agrees on it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(key: impl Into<String>) -> Self {
        StorageKey(key.into())
    }

    /// Key for a conversation: `{channel}/conversations/{conversation}`.
    ///
    /// `%` and `/` inside either id are percent-escaped, so distinct
    /// conversations never share a key.
    pub fn for_conversation(conversation: &ConversationRef) -> Self {
        StorageKey(format!(
            "{}/conversations/{}",
            escape_segment(&conversation.channel_id),
            escape_segment(&conversation.conversation_id)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SHA-256 of the key, used to address objects on disk.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hasher.finalize().into()
    }
}

fn escape_segment(segment: &str) -> Cow<'_, str> {
    if !segment.contains(|c: char| c == '%' || c == '/') {
        return Cow::Borrowed(segment);
    }
    let mut escaped = String::with_capacity(segment.len() + 4);
    for c in segment.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2F"),
            _ => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageKey({})", self.0)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque version token assigned by a store on every successful save.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ETag(String);

impl ETag {
    pub fn new(tag: impl Into<String>) -> Self {
        ETag(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ETag({})", self.0)
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored document paired with its version token.
#[derive(Clone, Debug, PartialEq)]
pub struct VersionedRecord {
    /// `Value::Null` when the key has never been written.
    pub value: Value,
    pub etag: Option<ETag>,
}

impl VersionedRecord {
    /// Record returned for a key that does not exist yet.
    pub fn absent() -> Self {
        Self {
            value: Value::Null,
            etag: None,
        }
    }

    pub fn new(value: Value, etag: ETag) -> Self {
        Self {
            value,
            etag: Some(etag),
        }
    }

    pub fn is_absent(&self) -> bool {
        self.etag.is_none()
    }
}

/// An incoming activity for a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub conversation: ConversationRef,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

impl InboundEvent {
    pub fn text(conversation: ConversationRef, text: impl Into<String>) -> Self {
        Self {
            conversation,
            text: Some(text.into()),
            value: None,
        }
    }

    pub fn value(conversation: ConversationRef, value: Value) -> Self {
        Self {
            conversation,
            text: None,
            value: Some(value),
        }
    }

    pub fn storage_key(&self) -> StorageKey {
        StorageKey::for_conversation(&self.conversation)
    }
}

/// A message produced during a turn, sent only after the turn commits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            value: None,
        }
    }

    pub fn value(value: Value) -> Self {
        Self {
            text: None,
            value: Some(value),
        }
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time. Clocks before the epoch read as zero.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}
