//! Error handling and edge case tests.

use scaleout::{
    BoxError, ChannelDispatcher, ConversationRef, ConversationStateMachine, DispatchError,
    Dispatcher, DurableStore, ETag, FsObjectBackend, FsObjectStoreConfig, InboundEvent,
    MemoryStore, OutboundMessage, RetryPolicy, ScaleoutError, ScaleoutProcessor, StorageError,
    StorageKey, StorageResult, TurnContext, VersionedRecord, VersionedStore,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Replies with one message per word of input.
struct WordBot;

impl ConversationStateMachine for WordBot {
    type State = Vec<String>;

    fn on_turn(
        &self,
        state: &mut Vec<String>,
        event: &InboundEvent,
        ctx: &mut TurnContext,
    ) -> Result<(), BoxError> {
        let text = event.text.as_deref().unwrap_or_default();
        if text == "explode" {
            return Err("recognizer unavailable".into());
        }
        for word in text.split_whitespace() {
            state.push(word.to_string());
            ctx.send_text(word);
        }
        Ok(())
    }
}

fn event(text: &str) -> InboundEvent {
    InboundEvent::text(ConversationRef::new("test", "c1"), text)
}

/// Accepts a fixed number of messages, then rejects.
struct FlakyChannel {
    accept: usize,
    sent: AtomicUsize,
}

impl Dispatcher for FlakyChannel {
    fn send(&self, _: &ConversationRef, _: &OutboundMessage) -> Result<(), DispatchError> {
        if self.sent.load(Ordering::SeqCst) >= self.accept {
            return Err(DispatchError::Rejected("502 from connector".into()));
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails saves while loads keep working.
struct ReadOnly(MemoryStore);

impl VersionedStore for ReadOnly {
    fn load(&self, key: &StorageKey) -> StorageResult<VersionedRecord> {
        self.0.load(key)
    }

    fn save(&self, _: &StorageKey, _: &Value, _: Option<&ETag>) -> StorageResult<bool> {
        Err(StorageError::Unavailable("write quorum lost".into()))
    }
}

/// Never lets a save through.
struct Contended;

impl VersionedStore for Contended {
    fn load(&self, _key: &StorageKey) -> StorageResult<VersionedRecord> {
        Ok(VersionedRecord::absent())
    }

    fn save(&self, _: &StorageKey, _: &Value, _: Option<&ETag>) -> StorageResult<bool> {
        Ok(false)
    }
}

// --- Snapshot Errors ---

#[test]
fn test_corrupt_snapshot_is_not_treated_as_new_conversation() {
    let store = MemoryStore::new();
    let key = event("hi").storage_key();
    store
        .save(&key, &json!({"conversation_state": {"unexpected": true}}), None)
        .unwrap();
    let before = store.load(&key).unwrap();

    let (dispatcher, outbox) = ChannelDispatcher::new(16);
    let processor = ScaleoutProcessor::new(&store, dispatcher);

    let result = processor.process(&WordBot, &event("hi"));
    assert!(matches!(result, Err(ScaleoutError::StateDeserialization(_))));
    assert!(outbox.try_recv().is_err());
    assert_eq!(store.load(&key).unwrap(), before);
}

#[test]
fn test_non_object_snapshot_is_rejected() {
    let store = MemoryStore::new();
    let key = event("hi").storage_key();
    store.save(&key, &json!("legacy-v3-blob"), None).unwrap();

    let (dispatcher, _outbox) = ChannelDispatcher::new(16);
    let processor = ScaleoutProcessor::new(&store, dispatcher);

    let result = processor.process(&WordBot, &event("hi"));
    assert!(matches!(result, Err(ScaleoutError::StateDeserialization(_))));
}

// --- State Machine Errors ---

#[test]
fn test_state_machine_error_propagates_without_commit() {
    let store = MemoryStore::new();
    let (dispatcher, outbox) = ChannelDispatcher::new(16);
    let processor = ScaleoutProcessor::new(&store, dispatcher);

    let result = processor.process(&WordBot, &event("explode"));
    match result {
        Err(ScaleoutError::StateMachine(source)) => {
            assert_eq!(source.to_string(), "recognizer unavailable");
        }
        other => panic!("expected state machine error, got {other:?}"),
    }
    assert!(store.is_empty());
    assert!(outbox.try_recv().is_err());
}

// --- Storage Errors ---

#[test]
fn test_save_failure_aborts_without_dispatch() {
    let (dispatcher, outbox) = ChannelDispatcher::new(16);
    let processor = ScaleoutProcessor::new(ReadOnly(MemoryStore::new()), dispatcher);

    let result = processor.process(&WordBot, &event("hello there"));
    assert!(matches!(
        result,
        Err(ScaleoutError::Storage(StorageError::Unavailable(_)))
    ));
    assert!(outbox.try_recv().is_err());
    assert!(processor.store().0.is_empty());
}

#[test]
fn test_corrupt_object_file_surfaces_storage_error() {
    let dir = TempDir::new().unwrap();
    let backend = FsObjectBackend::open(FsObjectStoreConfig {
        path: dir.path().to_path_buf(),
        ..Default::default()
    })
    .unwrap();
    let store = DurableStore::new(backend);
    let key = event("hi").storage_key();
    store.save(&key, &json!({}), None).unwrap();

    let path = store.backend().object_path(&key);
    std::fs::write(&path, b"garbage").unwrap();

    let (dispatcher, outbox) = ChannelDispatcher::new(16);
    let processor = ScaleoutProcessor::new(&store, dispatcher);
    let result = processor.process(&WordBot, &event("hi"));
    assert!(matches!(
        result,
        Err(ScaleoutError::Storage(StorageError::InvalidFormat(_)))
    ));
    assert!(outbox.try_recv().is_err());
}

// --- Dispatch Errors ---

#[test]
fn test_dispatch_failure_keeps_committed_state() {
    let store = MemoryStore::new();
    let channel = FlakyChannel {
        accept: 1,
        sent: AtomicUsize::new(0),
    };
    let processor = ScaleoutProcessor::new(&store, &channel);

    let result = processor.process(&WordBot, &event("one two three"));
    match result {
        Err(ScaleoutError::Dispatch { delivered, source }) => {
            assert_eq!(delivered, 1);
            assert!(matches!(source, DispatchError::Rejected(_)));
        }
        other => panic!("expected dispatch error, got {other:?}"),
    }

    // State already advanced; there is no rollback.
    let record = store.load(&event("x").storage_key()).unwrap();
    assert_eq!(
        record.value,
        json!({"conversation_state": ["one", "two", "three"]})
    );
}

#[test]
fn test_disconnected_outbox() {
    let store = MemoryStore::new();
    let processor = ScaleoutProcessor::new(&store, ChannelDispatcher::default());

    let result = processor.process(&WordBot, &event("hi"));
    assert!(matches!(
        result,
        Err(ScaleoutError::Dispatch {
            delivered: 0,
            source: DispatchError::Disconnected
        })
    ));
    assert!(!store.is_empty());
}

#[test]
fn test_turn_without_messages_dispatches_nothing() {
    let channel = FlakyChannel {
        accept: 0,
        sent: AtomicUsize::new(0),
    };
    let processor = ScaleoutProcessor::new(MemoryStore::new(), &channel);

    let report = processor.process(&WordBot, &event("")).unwrap();
    assert_eq!(report.dispatched, 0);
    assert_eq!(channel.sent.load(Ordering::SeqCst), 0);
}

// --- Retry Policy ---

#[test]
fn test_retry_cap_reports_key_and_attempts() {
    let (dispatcher, outbox) = ChannelDispatcher::new(16);
    let processor =
        ScaleoutProcessor::new(Contended, dispatcher).with_retry(RetryPolicy::bounded(5));

    match processor.process(&WordBot, &event("hi")) {
        Err(ScaleoutError::RetriesExhausted { key, attempts }) => {
            assert_eq!(key.as_str(), "test/conversations/c1");
            assert_eq!(attempts, 5);
        }
        other => panic!("expected retries exhausted, got {other:?}"),
    }
    assert!(outbox.try_recv().is_err());
}

#[test]
fn test_backoff_between_attempts() {
    let (dispatcher, _outbox) = ChannelDispatcher::new(16);
    let processor = ScaleoutProcessor::new(Contended, dispatcher)
        .with_retry(RetryPolicy::bounded(3).with_backoff(Duration::from_millis(10)));

    let started = Instant::now();
    let result = processor.process(&WordBot, &event("hi"));
    assert!(matches!(result, Err(ScaleoutError::RetriesExhausted { .. })));
    // Sleeps after attempts 1 and 2: 10ms + 20ms.
    assert!(started.elapsed() >= Duration::from_millis(30));
}
