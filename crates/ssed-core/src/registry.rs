//! Registry of active subscriber queues.
//!
//! The registry is plain owned state with no interior locking. It is only
//! ever touched by the broker's coordination task.

use crate::broker::SlowSubscriberPolicy;
use crate::message::Message;
use crate::subscriber::SubscriberId;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

/// Outcome of offering one message to every registry member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fanout {
    /// Subscribers whose queue accepted the message.
    pub delivered: usize,
    /// Subscribers that were full and skipped this message.
    pub dropped: usize,
    /// Subscribers removed during this broadcast (full under the disconnect
    /// policy, or whose handler already went away).
    pub evicted: usize,
}

/// Set of active subscriber queues, keyed by channel identity.
#[derive(Debug, Default)]
pub struct Registry {
    members: HashMap<SubscriberId, mpsc::Sender<Message>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber.
    ///
    /// Returns `false` if the id was already present; the existing entry is
    /// kept so a member can never appear twice.
    pub fn insert(&mut self, id: SubscriberId, sender: mpsc::Sender<Message>) -> bool {
        if self.members.contains_key(&id) {
            warn!(subscriber = %id, "Duplicate registration ignored");
            return false;
        }
        self.members.insert(id, sender);
        debug!(subscriber = %id, subscribers = self.members.len(), "Subscriber registered");
        true
    }

    /// Remove a subscriber.
    ///
    /// Returns `true` if it was present. Removing an unknown id is a no-op.
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        let removed = self.members.remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, subscribers = self.members.len(), "Subscriber deregistered");
        }
        removed
    }

    /// Check whether a subscriber is registered.
    #[must_use]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.members.contains_key(&id)
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Registered ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<SubscriberId> {
        let mut ids: Vec<SubscriberId> = self.members.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Offer `message` to every member without waiting on any of them.
    ///
    /// A failed offer to one member never prevents the offer to the others.
    pub fn broadcast(&mut self, message: &Message, policy: SlowSubscriberPolicy) -> Fanout {
        let mut fanout = Fanout::default();

        self.members.retain(|id, sender| match sender.try_send(message.clone()) {
            Ok(()) => {
                fanout.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => match policy {
                SlowSubscriberPolicy::Drop => {
                    trace!(subscriber = %id, message = message.id(), "Queue full, message dropped");
                    fanout.dropped += 1;
                    true
                }
                SlowSubscriberPolicy::Disconnect => {
                    warn!(subscriber = %id, "Queue full, subscriber evicted");
                    fanout.evicted += 1;
                    false
                }
            },
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = %id, "Receiver gone, subscriber removed");
                fanout.evicted += 1;
                false
            }
        });

        fanout
    }
}
