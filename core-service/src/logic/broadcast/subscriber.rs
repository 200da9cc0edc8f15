//! Subscriber handles
//!
//! A subscriber is anything that can take a message without blocking.
//! Live connections use [`ChannelSubscriber`]: the connection task drains
//! the receiving half and writes to its socket.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use super::BroadcastMessage;

pub type SubscriberId = Uuid;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("subscriber {0} is not keeping up, message dropped")]
    Full(SubscriberId),

    #[error("subscriber {0} disconnected")]
    Closed(SubscriberId),

    #[error("delivery failed: {0}")]
    Other(String),
}

impl DeliveryError {
    /// The subscriber is gone for good and can be pruned
    pub fn is_closed(&self) -> bool {
        matches!(self, DeliveryError::Closed(_))
    }
}

pub trait Subscriber: Send + Sync {
    fn id(&self) -> SubscriberId;

    /// Hand over one message. Must not block.
    fn deliver(&self, message: &BroadcastMessage) -> Result<(), DeliveryError>;
}

/// Bounded channel into a connection task
pub struct ChannelSubscriber {
    id: SubscriberId,
    tx: mpsc::Sender<BroadcastMessage>,
}

impl ChannelSubscriber {
    pub fn new(buffer: usize) -> (Arc<Self>, mpsc::Receiver<BroadcastMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let subscriber = Arc::new(Self { id: Uuid::new_v4(), tx });
        (subscriber, rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn deliver(&self, message: &BroadcastMessage) -> Result<(), DeliveryError> {
        self.tx.try_send(message.clone()).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full(self.id),
            TrySendError::Closed(_) => DeliveryError::Closed(self.id),
        })
    }
}
