//! # Scaleout
//!
//! Coordinates per-conversation state across any number of independent
//! workers using optimistic concurrency instead of locks.
//!
//! ## Core Concepts
//!
//! - **Versioned stores**: key/value storage with compare-and-swap saves
//!   (in-memory, or durable over an object store with conditional writes)
//! - **Turn host**: runs conversation logic as a pure function of the
//!   prior snapshot, buffering everything it tries to send
//! - **Processor**: load, run, conditionally save, and only dispatch the
//!   buffered messages once the save has been accepted
//!
//! ## Example
//!
//! ```ignore
//! use scaleout::{ChannelDispatcher, InboundEvent, MemoryStore, ScaleoutProcessor};
//!
//! let (dispatcher, outbox) = ChannelDispatcher::new(64);
//! let processor = ScaleoutProcessor::new(MemoryStore::new(), dispatcher);
//!
//! let report = processor.process(&my_bot, &InboundEvent::text(conversation, "hello"))?;
//! for delivery in outbox.try_iter() {
//!     connector.send(delivery)?;
//! }
//! ```

pub mod dispatch;
pub mod error;
pub mod host;
pub mod processor;
pub mod storage;
pub mod types;

// Re-exports
pub use dispatch::{ChannelDispatcher, Delivery, Dispatcher};
pub use error::{BoxError, DispatchError, Result, ScaleoutError, StorageError, StorageResult};
pub use host::{ConversationStateMachine, TurnContext, TurnHost, TurnOutput, DEFAULT_STATE_SLOT};
pub use processor::{ProcessorConfig, RetryPolicy, ScaleoutProcessor, TurnReport};
pub use storage::{
    DurableStore, FsObjectBackend, FsObjectStoreConfig, MemoryStore, ObjectBackend, PutCondition,
    PutOutcome, StoredObject, VersionedStore,
};
pub use types::*;
