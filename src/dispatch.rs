//! Delivery of committed outbound messages.

use crate::error::DispatchError;
use crate::types::{ConversationRef, OutboundMessage};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Default capacity of a [`ChannelDispatcher`] queue.
const DEFAULT_CAPACITY: usize = 1024;

/// Channel that transmits messages to the outside world.
///
/// Only called with messages whose turn has already been persisted.
pub trait Dispatcher: Send + Sync {
    fn send(&self, conversation: &ConversationRef, message: &OutboundMessage)
        -> Result<(), DispatchError>;
}

impl<D: Dispatcher + ?Sized> Dispatcher for std::sync::Arc<D> {
    fn send(
        &self,
        conversation: &ConversationRef,
        message: &OutboundMessage,
    ) -> Result<(), DispatchError> {
        (**self).send(conversation, message)
    }
}

impl<D: Dispatcher + ?Sized> Dispatcher for &D {
    fn send(
        &self,
        conversation: &ConversationRef,
        message: &OutboundMessage,
    ) -> Result<(), DispatchError> {
        (**self).send(conversation, message)
    }
}

/// A message paired with the conversation it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub conversation: ConversationRef,
    pub message: OutboundMessage,
}

/// Dispatcher that hands deliveries to a bounded in-process queue.
///
/// The receiving end is typically a connector task that talks to the real
/// channel. A full queue or a dropped receiver fails the send instead of
/// blocking the worker.
#[derive(Clone)]
pub struct ChannelDispatcher {
    sender: Sender<Delivery>,
}

impl ChannelDispatcher {
    /// Create a dispatcher and the receiver that drains it.
    pub fn new(capacity: usize) -> (Self, Receiver<Delivery>) {
        let (sender, receiver) = bounded(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl Default for ChannelDispatcher {
    /// Dispatcher whose receiver is dropped immediately. Useful only where
    /// dispatch failures are the point.
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY).0
    }
}

impl Dispatcher for ChannelDispatcher {
    fn send(
        &self,
        conversation: &ConversationRef,
        message: &OutboundMessage,
    ) -> Result<(), DispatchError> {
        let delivery = Delivery {
            conversation: conversation.clone(),
            message: message.clone(),
        };
        match self.sender.try_send(delivery) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DispatchError::Full),
            Err(TrySendError::Disconnected(_)) => Err(DispatchError::Disconnected),
        }
    }
}
