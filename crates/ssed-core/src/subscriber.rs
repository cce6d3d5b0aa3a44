//! Per-connection delivery queue.

use crate::message::Message;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a subscriber channel.
///
/// Allocated once per channel and never reused within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receiving half of a subscriber's queue.
///
/// The broker keeps the sending half in its registry; the connection handler
/// owning this value is the only consumer.
#[derive(Debug)]
pub struct SubscriberChannel {
    id: SubscriberId,
    receiver: mpsc::Receiver<Message>,
}

impl SubscriberChannel {
    /// Create a channel with a fresh identity, returning the sending half
    /// that a [`Registry`](crate::Registry) holds.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<Message>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let channel = Self {
            id: SubscriberId::next(),
            receiver,
        };
        (channel, sender)
    }

    /// Get the channel identity.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once the broker has dropped this subscriber (evicted,
    /// deregistered, or the broker itself is gone) and the queue is drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Take the next message if one is already queued.
    ///
    /// # Errors
    ///
    /// Returns `TryRecvError::Empty` when nothing is queued and
    /// `TryRecvError::Disconnected` when the broker dropped this subscriber.
    pub fn try_recv(&mut self) -> Result<Message, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Number of messages waiting in the queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let (a, _tx_a) = SubscriberChannel::new(4);
        let (b, _tx_b) = SubscriberChannel::new(4);
        assert_ne!(a.id(), b.id());
        assert!(a.id().to_string().starts_with("sub-"));
    }

    #[tokio::test]
    async fn test_fifo_delivery() {
        let (mut channel, tx) = SubscriberChannel::new(4);
        tx.try_send(Message::from("one")).unwrap();
        tx.try_send(Message::from("two")).unwrap();
        assert_eq!(channel.pending(), 2);

        assert_eq!(&channel.recv().await.unwrap().payload()[..], b"one");
        assert_eq!(&channel.recv().await.unwrap().payload()[..], b"two");

        drop(tx);
        assert!(channel.recv().await.is_none());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (mut channel, tx) = SubscriberChannel::new(0);
        assert!(tx.try_send(Message::from("x")).is_ok());
        assert!(channel.try_recv().is_ok());
    }
}
