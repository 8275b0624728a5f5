//! Scale-out turn processor.
//!
//! Processes one inbound event with optimistic concurrency:
//!
//! 1. load the conversation's record and its version token
//! 2. run the turn against the loaded snapshot, buffering all sends
//! 3. save the new snapshot conditioned on the loaded token
//! 4. on success dispatch the buffered messages in order; on conflict
//!    throw the turn's output away and start again from 1
//!
//! Any number of processors, in any number of processes, may work on the
//! same conversation. Only the attempt whose save lands gets to send.

use crate::dispatch::Dispatcher;
use crate::error::{Result, ScaleoutError};
use crate::host::{ConversationStateMachine, TurnHost};
use crate::storage::VersionedStore;
use crate::types::{InboundEvent, StorageKey};
use std::time::Duration;

/// What to do when a save loses the race.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per event. `None` retries forever.
    pub max_attempts: Option<u32>,

    /// Base delay between attempts, multiplied by the attempt number.
    /// `None` retries immediately.
    pub backoff: Option<Duration>,
}

impl RetryPolicy {
    /// Retry until a save lands, without delay.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff: None,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = Some(backoff);
        self
    }
}

/// Processor configuration.
#[derive(Clone, Debug, Default)]
pub struct ProcessorConfig {
    pub retry: RetryPolicy,
}

/// Summary of a committed turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnReport {
    pub key: StorageKey,
    /// Attempts made, including the one that committed.
    pub attempts: u32,
    /// Messages handed to the dispatcher.
    pub dispatched: usize,
}

/// Runs turns against a shared [`VersionedStore`].
pub struct ScaleoutProcessor<S, D> {
    store: S,
    dispatcher: D,
    host: TurnHost,
    config: ProcessorConfig,
}

impl<S: VersionedStore, D: Dispatcher> ScaleoutProcessor<S, D> {
    pub fn new(store: S, dispatcher: D) -> Self {
        Self {
            store,
            dispatcher,
            host: TurnHost::new(),
            config: ProcessorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn with_host(mut self, host: TurnHost) -> Self {
        self.host = host;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Process one inbound event to completion.
    ///
    /// Storage and state errors abort before anything is sent. A dispatch
    /// error is returned after the new state has already been committed.
    pub fn process<M>(&self, machine: &M, event: &InboundEvent) -> Result<TurnReport>
    where
        M: ConversationStateMachine + ?Sized,
    {
        let key = event.storage_key();
        let mut attempts = 0u32;

        let outbound = loop {
            attempts = next_attempt(attempts);

            let record = self.store.load(&key)?;
            let output = self.host.run(machine, event, &record.value)?;

            if self
                .store
                .save(&key, &output.snapshot, record.etag.as_ref())?
            {
                tracing::debug!(%key, attempts, outbound = output.outbound.len(), "turn committed");
                break output.outbound;
            }

            tracing::debug!(%key, attempt = attempts, etag = ?record.etag, "save conflicted, retrying turn");

            if let Some(max_attempts) = self.config.retry.max_attempts {
                if attempts >= max_attempts {
                    tracing::warn!(%key, attempts, "giving up after repeated conflicts");
                    return Err(ScaleoutError::RetriesExhausted { key, attempts });
                }
            }
            if let Some(backoff) = self.config.retry.backoff {
                std::thread::sleep(backoff.saturating_mul(attempts));
            }
        };

        for (delivered, message) in outbound.iter().enumerate() {
            if let Err(source) = self.dispatcher.send(&event.conversation, message) {
                tracing::warn!(%key, delivered, error = %source, "dispatch failed after commit");
                return Err(ScaleoutError::Dispatch { delivered, source });
            }
        }

        Ok(TurnReport {
            key,
            attempts,
            dispatched: outbound.len(),
        })
    }
}

/// Attempt counter that pins at `u32::MAX` under an unbounded policy.
fn next_attempt(attempts: u32) -> u32 {
    attempts.saturating_add(1)
}
