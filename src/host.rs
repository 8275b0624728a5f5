//! Turn execution host.
//!
//! Runs one turn of a [`ConversationStateMachine`] as a pure function of
//! `(event, prior snapshot)`. Messages the machine sends are buffered in
//! the [`TurnContext`] and handed back to the caller, who decides whether
//! they ever leave the process.

use crate::error::{BoxError, Result, ScaleoutError};
use crate::types::{ConversationRef, InboundEvent, OutboundMessage};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Snapshot member holding the machine's own state.
pub const DEFAULT_STATE_SLOT: &str = "conversation_state";

/// Per-turn execution context handed to a state machine.
pub struct TurnContext {
    conversation: ConversationRef,
    outbound: Vec<OutboundMessage>,
}

impl TurnContext {
    fn new(conversation: ConversationRef) -> Self {
        Self {
            conversation,
            outbound: Vec::new(),
        }
    }

    pub fn conversation(&self) -> &ConversationRef {
        &self.conversation
    }

    /// Queue a message. Nothing is transmitted until the turn commits.
    pub fn send(&mut self, message: OutboundMessage) {
        self.outbound.push(message);
    }

    pub fn send_text(&mut self, text: impl Into<String>) {
        self.send(OutboundMessage::text(text));
    }

    /// Messages queued so far, in send order.
    pub fn pending(&self) -> &[OutboundMessage] {
        &self.outbound
    }
}

/// Conversation logic driven by the host.
///
/// Implementations must be free of external side effects: a turn may be
/// executed several times against freshly loaded state before one of the
/// executions commits.
pub trait ConversationStateMachine: Send + Sync {
    /// Persisted internal state. A new conversation starts from `default()`.
    type State: Serialize + DeserializeOwned + Default;

    fn on_turn(
        &self,
        state: &mut Self::State,
        event: &InboundEvent,
        ctx: &mut TurnContext,
    ) -> std::result::Result<(), BoxError>;
}

/// Output of a single turn.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnOutput {
    /// Buffered messages in the order the machine sent them.
    pub outbound: Vec<OutboundMessage>,
    /// Snapshot to persist if the turn commits.
    pub snapshot: Value,
}

/// Bridges JSON snapshots and a machine's typed state.
#[derive(Clone, Debug)]
pub struct TurnHost {
    slot: String,
}

impl TurnHost {
    pub fn new() -> Self {
        Self {
            slot: DEFAULT_STATE_SLOT.to_string(),
        }
    }

    /// Use a different snapshot member for the machine's state.
    pub fn with_slot(slot: impl Into<String>) -> Self {
        Self { slot: slot.into() }
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// Run exactly one turn.
    ///
    /// `prior` is `null` for a new conversation. Any other non-object value,
    /// or a state slot that does not decode, is rejected rather than treated
    /// as a fresh conversation.
    pub fn run<M>(&self, machine: &M, event: &InboundEvent, prior: &Value) -> Result<TurnOutput>
    where
        M: ConversationStateMachine + ?Sized,
    {
        let mut document = match prior {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(ScaleoutError::StateDeserialization(format!(
                    "snapshot must be an object, found {}",
                    json_kind(other)
                )))
            }
        };

        let mut state = match document.get(&self.slot) {
            None | Some(Value::Null) => M::State::default(),
            Some(slot) => M::State::deserialize(slot).map_err(|e| {
                ScaleoutError::StateDeserialization(format!("slot {:?}: {}", self.slot, e))
            })?,
        };

        let mut ctx = TurnContext::new(event.conversation.clone());
        machine
            .on_turn(&mut state, event, &mut ctx)
            .map_err(ScaleoutError::StateMachine)?;

        let encoded = serde_json::to_value(&state)
            .map_err(|e| ScaleoutError::StateSerialization(e.to_string()))?;
        document.insert(self.slot.clone(), encoded);

        tracing::trace!(
            conversation = %event.conversation.conversation_id,
            outbound = ctx.outbound.len(),
            "turn executed"
        );

        Ok(TurnOutput {
            outbound: ctx.outbound,
            snapshot: Value::Object(document),
        })
    }
}

impl Default for TurnHost {
    fn default() -> Self {
        Self::new()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
