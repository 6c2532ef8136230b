use crate::shared_types::Notification;
use nanoid::nanoid;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

pub type ListenerId = String;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("listener is gone")]
    Closed,
    #[error("listener is not keeping up")]
    Lagging,
}

/// Send capability a listener hands to its room's broadcaster.
///
/// `send` must not block: a listener that cannot take a message right now
/// reports an error and gets dropped.
pub trait Sink: Send + Sync {
    fn send(&self, notification: &Notification) -> Result<(), SinkError>;
}

/// Sink backed by a bounded channel. The receiving half is drained by the
/// connection task (SSE stream or WebSocket writer).
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Notification>,
}

impl ChannelSink {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(buffer);
        (ChannelSink { tx }, rx)
    }
}

impl Sink for ChannelSink {
    fn send(&self, notification: &Notification) -> Result<(), SinkError> {
        self.tx
            .try_send(notification.clone())
            .map_err(|err| match err {
                TrySendError::Full(_) => SinkError::Lagging,
                TrySendError::Closed(_) => SinkError::Closed,
            })
    }
}

/// The listeners of one room.
#[derive(Default)]
pub struct Broadcaster {
    listeners: HashMap<ListenerId, Box<dyn Sink>>,
}

impl Broadcaster {
    pub fn subscribe(&mut self, sink: Box<dyn Sink>) -> ListenerId {
        let id = nanoid!(10);
        self.listeners.insert(id.clone(), sink);
        id
    }

    pub fn unsubscribe(&mut self, listener: &str) -> bool {
        self.listeners.remove(listener).is_some()
    }

    /// Deliver to every listener; the ones that fail are removed.
    /// Returns how many listeners received the notification.
    pub fn publish(&mut self, notification: &Notification) -> usize {
        let before = self.listeners.len();
        self.listeners
            .retain(|id, sink| match sink.send(notification) {
                Ok(()) => true,
                Err(err) => {
                    debug!(listener = %id, error = %err, "Dropping listener");
                    false
                }
            });
        let delivered = self.listeners.len();
        if delivered < before {
            debug!(dropped = before - delivered, "Pruned failed listeners");
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
