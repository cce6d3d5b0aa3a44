//! Broadcast broker.
//!
//! A [`Broker`] is a cheap, cloneable handle. All state lives in a single
//! coordination task spawned by [`Broker::spawn`]; handles only ever talk to
//! it through intake queues:
//!
//! - **register** - new subscriber queues (unbounded)
//! - **deregister** - ids of subscribers to drop (unbounded, so it can be fed from `Drop`)
//! - **publish** - messages to fan out (bounded, the only place a caller may wait)
//! - **inspect** - registry snapshot requests
//!
//! Because only the coordination task reads or writes the [`Registry`], no
//! lock guards it and membership changes cannot race with a broadcast.

use crate::message::Message;
use crate::registry::{Fanout, Registry};
use crate::subscriber::{SubscriberChannel, SubscriberId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Broker errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The coordination task is no longer running.
    #[error("Broker is shut down")]
    Closed,

    /// The publish intake is at capacity.
    #[error("Publish intake is full")]
    Full,

    /// The message is larger than the broker accepts.
    #[error("Message size {size} exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },
}

/// Default limit on a single message payload (1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// What to do with a subscriber whose queue is full at broadcast time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlowSubscriberPolicy {
    /// Skip this message for that subscriber only.
    #[default]
    Drop,
    /// Remove the subscriber; its handler sees the queue close and hangs up.
    Disconnect,
}

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Capacity of the publish intake.
    pub publish_capacity: usize,
    /// Capacity of each subscriber queue.
    pub subscriber_capacity: usize,
    /// Policy applied to subscribers that fall behind.
    pub slow_subscriber: SlowSubscriberPolicy,
    /// Largest payload accepted by the publish intake, in bytes.
    pub max_message_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            publish_capacity: 64,
            subscriber_capacity: 64,
            slow_subscriber: SlowSubscriberPolicy::Drop,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Counters maintained by the coordination task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Currently registered subscribers.
    pub subscribers: usize,
    /// Messages broadcast so far.
    pub published: u64,
    /// Successful per-subscriber offers.
    pub delivered: u64,
    /// Per-subscriber offers skipped because the queue was full.
    pub dropped: u64,
    /// Subscribers removed by the broker during a broadcast.
    pub evicted: u64,
}

struct Registration {
    id: SubscriberId,
    sender: mpsc::Sender<Message>,
}

type SnapshotReply = oneshot::Sender<Vec<SubscriberId>>;

/// Handle to the broadcast broker.
#[derive(Debug, Clone)]
pub struct Broker {
    publish_tx: mpsc::Sender<Message>,
    register_tx: mpsc::UnboundedSender<Registration>,
    deregister_tx: mpsc::UnboundedSender<SubscriberId>,
    inspect_tx: mpsc::UnboundedSender<SnapshotReply>,
    stats: watch::Receiver<BrokerStats>,
    subscriber_capacity: usize,
    max_message_size: usize,
}

impl Broker {
    /// Spawn the coordination task and return a handle to it.
    ///
    /// The task runs until every handle has been dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn spawn(config: BrokerConfig) -> Self {
        info!("Starting broker with config: {:?}", config);

        let (publish_tx, publish_rx) = mpsc::channel(config.publish_capacity.max(1));
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (deregister_tx, deregister_rx) = mpsc::unbounded_channel();
        let (inspect_tx, inspect_rx) = mpsc::unbounded_channel();
        let (stats_tx, stats) = watch::channel(BrokerStats::default());

        let coordinator = Coordinator {
            registry: Registry::new(),
            policy: config.slow_subscriber,
            publish_rx,
            register_rx,
            deregister_rx,
            inspect_rx,
            stats_tx,
            stats: BrokerStats::default(),
        };
        tokio::spawn(coordinator.run());

        Self {
            publish_tx,
            register_tx,
            deregister_tx,
            inspect_tx,
            stats,
            subscriber_capacity: config.subscriber_capacity,
            max_message_size: config.max_message_size,
        }
    }

    /// Queue a message for every currently registered subscriber.
    ///
    /// Waits only while the publish intake is full.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::TooLarge`] without queueing anything if the
    /// payload exceeds the configured maximum, or [`BrokerError::Closed`] if
    /// the coordination task is gone.
    pub async fn publish(&self, message: impl Into<Message>) -> Result<(), BrokerError> {
        let message = self.admit(message.into())?;
        self.publish_tx
            .send(message)
            .await
            .map_err(|_| BrokerError::Closed)
    }

    /// Queue a message without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::TooLarge`] if the payload exceeds the configured
    /// maximum, [`BrokerError::Full`] if the intake is at capacity, or
    /// [`BrokerError::Closed`] if the coordination task is gone.
    pub fn try_publish(&self, message: impl Into<Message>) -> Result<(), BrokerError> {
        let message = self.admit(message.into())?;
        self.publish_tx
            .try_send(message)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => BrokerError::Full,
                mpsc::error::TrySendError::Closed(_) => BrokerError::Closed,
            })
    }

    fn admit(&self, message: Message) -> Result<Message, BrokerError> {
        if message.len() > self.max_message_size {
            return Err(BrokerError::TooLarge {
                size: message.len(),
                max: self.max_message_size,
            });
        }
        Ok(message)
    }

    /// Create a subscriber channel and ask for it to be added to the registry.
    ///
    /// Returns before the registration is applied. Any publish issued after
    /// this call returns is broadcast to the new channel.
    pub fn register(&self) -> SubscriberChannel {
        let (channel, sender) = SubscriberChannel::new(self.subscriber_capacity);
        let id = channel.id();
        if self.register_tx.send(Registration { id, sender }).is_err() {
            // The sender went down with the request, so the channel reads as closed.
            warn!(subscriber = %id, "Broker is shut down, registration discarded");
        }
        channel
    }

    /// Ask for a subscriber to be removed from the registry.
    ///
    /// Idempotent: unknown or already removed ids are ignored.
    pub fn deregister(&self, id: SubscriberId) {
        if self.deregister_tx.send(id).is_err() {
            debug!(subscriber = %id, "Broker is shut down, nothing to deregister");
        }
    }

    /// Snapshot of the registry, sorted by id.
    ///
    /// Reflects every register/deregister request submitted before this call.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Closed`] if the coordination task is gone.
    pub async fn subscribers(&self) -> Result<Vec<SubscriberId>, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.inspect_tx
            .send(reply)
            .map_err(|_| BrokerError::Closed)?;
        rx.await.map_err(|_| BrokerError::Closed)
    }

    /// Latest counters published by the coordination task.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        *self.stats.borrow()
    }

    /// Receiver that is notified whenever the counters change.
    #[must_use]
    pub fn watch_stats(&self) -> watch::Receiver<BrokerStats> {
        self.stats.clone()
    }
}

/// State owned by the coordination task.
struct Coordinator {
    registry: Registry,
    policy: SlowSubscriberPolicy,
    publish_rx: mpsc::Receiver<Message>,
    register_rx: mpsc::UnboundedReceiver<Registration>,
    deregister_rx: mpsc::UnboundedReceiver<SubscriberId>,
    inspect_rx: mpsc::UnboundedReceiver<SnapshotReply>,
    stats_tx: watch::Sender<BrokerStats>,
    stats: BrokerStats,
}

impl Coordinator {
    async fn run(mut self) {
        debug!("Broker loop started");

        loop {
            // Unbiased: tokio picks randomly among ready branches.
            tokio::select! {
                Some(registration) = self.register_rx.recv() => {
                    self.apply_registration(registration);
                }
                Some(id) = self.deregister_rx.recv() => {
                    self.apply_deregistration(id);
                }
                Some(message) = self.publish_rx.recv() => {
                    self.drain_membership();
                    self.broadcast(&message);
                }
                Some(reply) = self.inspect_rx.recv() => {
                    self.drain_membership();
                    let _ = reply.send(self.registry.ids());
                }
                else => break,
            }

            self.publish_stats();
        }

        debug!(subscribers = self.registry.len(), "Broker loop stopped");
    }

    fn apply_registration(&mut self, registration: Registration) {
        self.registry.insert(registration.id, registration.sender);
    }

    fn apply_deregistration(&mut self, id: SubscriberId) {
        // The registration this cancels was queued before it; apply it first
        // so the removal cannot be overtaken.
        self.drain_registrations();
        self.registry.remove(id);
    }

    /// Apply the registrations queued right now. Bounded by the queue length
    /// at entry so a steady stream of new connections cannot stall the loop.
    fn drain_registrations(&mut self) {
        for _ in 0..self.register_rx.len() {
            match self.register_rx.try_recv() {
                Ok(registration) => self.apply_registration(registration),
                Err(_) => break,
            }
        }
    }

    fn drain_membership(&mut self) {
        self.drain_registrations();
        for _ in 0..self.deregister_rx.len() {
            match self.deregister_rx.try_recv() {
                Ok(id) => self.apply_deregistration(id),
                Err(_) => break,
            }
        }
    }

    fn broadcast(&mut self, message: &Message) {
        let Fanout {
            delivered,
            dropped,
            evicted,
        } = self.registry.broadcast(message, self.policy);

        self.stats.published += 1;
        self.stats.delivered += delivered as u64;
        self.stats.dropped += dropped as u64;
        self.stats.evicted += evicted as u64;

        debug!(
            message = message.id(),
            bytes = message.len(),
            delivered,
            dropped,
            evicted,
            subscribers = self.registry.len(),
            "Broadcast"
        );
    }

    fn publish_stats(&mut self) {
        self.stats.subscribers = self.registry.len();
        let next = self.stats;
        self.stats_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    async fn recv_text(channel: &mut SubscriberChannel) -> Vec<u8> {
        channel.recv().await.unwrap().payload().to_vec()
    }

    #[tokio::test]
    async fn test_hello_world_scenario() {
        let broker = Broker::spawn(BrokerConfig::default());
        let mut s1 = broker.register();
        let mut s2 = broker.register();
        let mut s3 = broker.register();

        broker.publish("hello").await.unwrap();
        for s in [&mut s1, &mut s2, &mut s3] {
            assert_eq!(recv_text(s).await, b"hello");
        }

        broker.deregister(s2.id());
        broker.publish("world").await.unwrap();

        assert_eq!(recv_text(&mut s1).await, b"world");
        assert_eq!(recv_text(&mut s3).await, b"world");
        assert!(s2.recv().await.is_none());

        assert!(matches!(s1.try_recv(), Err(TryRecvError::Empty)));
        assert!(matches!(s3.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let broker = Broker::spawn(BrokerConfig::default());
        broker.publish("no one listening").await.unwrap();

        let mut stats = broker.watch_stats();
        stats.wait_for(|s| s.published == 1).await.unwrap();
        assert_eq!(broker.stats().delivered, 0);

        // A late subscriber does not see the earlier message.
        let mut late = broker.register();
        broker.publish("later").await.unwrap();
        assert_eq!(recv_text(&mut late).await, b"later");
    }

    #[tokio::test]
    async fn test_deregister_is_idempotent() {
        let broker = Broker::spawn(BrokerConfig::default());
        let keep = broker.register();
        let gone = broker.register();
        let stray = SubscriberId::next();

        broker.deregister(gone.id());
        broker.deregister(gone.id());
        broker.deregister(stray);

        assert_eq!(broker.subscribers().await.unwrap(), vec![keep.id()]);
    }

    #[tokio::test]
    async fn test_registry_matches_membership_history() {
        let broker = Broker::spawn(BrokerConfig::default());
        let channels: Vec<_> = (0..10).map(|_| broker.register()).collect();

        for channel in channels.iter().step_by(2) {
            broker.deregister(channel.id());
        }
        broker.publish("interleaved").await.unwrap();
        broker.deregister(channels[1].id());

        let expected: Vec<_> = channels
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 2 == 1 && *i != 1)
            .map(|(_, c)| c.id())
            .collect();
        assert_eq!(broker.subscribers().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_deregister_never_overtakes_registration() {
        let broker = Broker::spawn(BrokerConfig::default());
        for _ in 0..100 {
            let channel = broker.register();
            broker.deregister(channel.id());
        }
        assert!(broker.subscribers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fifo_per_subscriber() {
        let broker = Broker::spawn(BrokerConfig::default());
        let mut sub = broker.register();

        for i in 0..20 {
            broker.publish(format!("m{i}")).await.unwrap();
        }
        for i in 0..20 {
            assert_eq!(recv_text(&mut sub).await, format!("m{i}").into_bytes());
        }
    }

    #[tokio::test]
    async fn test_stalled_subscriber_does_not_block_others() {
        let broker = Broker::spawn(BrokerConfig {
            subscriber_capacity: 2,
            ..BrokerConfig::default()
        });
        let stalled = broker.register();
        let mut live = broker.register();

        for i in 0..50 {
            broker.publish(format!("m{i}")).await.unwrap();
            assert_eq!(recv_text(&mut live).await, format!("m{i}").into_bytes());
        }

        assert_eq!(stalled.pending(), 2);
        let stats = broker.stats();
        assert_eq!(stats.dropped, 48);
        assert_eq!(stats.subscribers, 2);
    }

    #[tokio::test]
    async fn test_stalled_subscriber_evicted_under_disconnect_policy() {
        let broker = Broker::spawn(BrokerConfig {
            subscriber_capacity: 1,
            slow_subscriber: SlowSubscriberPolicy::Disconnect,
            ..BrokerConfig::default()
        });
        let mut stalled = broker.register();
        let mut live = broker.register();

        broker.publish("a").await.unwrap();
        assert_eq!(recv_text(&mut live).await, b"a");
        broker.publish("b").await.unwrap();
        assert_eq!(recv_text(&mut live).await, b"b");

        assert_eq!(recv_text(&mut stalled).await, b"a");
        assert!(stalled.recv().await.is_none());
        assert_eq!(broker.subscribers().await.unwrap(), vec![live.id()]);
    }

    #[tokio::test]
    async fn test_disconnected_subscriber_scenario() {
        let broker = Broker::spawn(BrokerConfig::default());
        let s1 = broker.register();
        let s1_id = s1.id();

        // What a connection handler does when its transport reports disconnect.
        drop(s1);
        broker.deregister(s1_id);

        broker.publish("after disconnect").await.unwrap();
        assert!(!broker.subscribers().await.unwrap().contains(&s1_id));

        let mut s2 = broker.register();
        broker.publish("still running").await.unwrap();
        assert_eq!(recv_text(&mut s2).await, b"still running");
    }

    #[tokio::test]
    async fn test_try_publish_reports_full_intake() {
        let broker = Broker::spawn(BrokerConfig {
            publish_capacity: 1,
            ..BrokerConfig::default()
        });

        // The coordination task has not been polled yet on this runtime.
        assert_eq!(broker.try_publish("first"), Ok(()));
        assert_eq!(broker.try_publish("second"), Err(BrokerError::Full));
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let broker = Broker::spawn(BrokerConfig {
            max_message_size: 4,
            ..BrokerConfig::default()
        });
        let mut sub = broker.register();

        assert_eq!(
            broker.publish("too long").await,
            Err(BrokerError::TooLarge { size: 8, max: 4 })
        );
        assert_eq!(
            broker.try_publish(vec![0u8; 5]),
            Err(BrokerError::TooLarge { size: 5, max: 4 })
        );

        broker.publish("ok").await.unwrap();
        assert_eq!(recv_text(&mut sub).await, b"ok");
        assert_eq!(broker.stats().published, 1);
    }

    #[tokio::test]
    async fn test_stats_track_subscribers() {
        let broker = Broker::spawn(BrokerConfig::default());
        let _a = broker.register();
        let _b = broker.register();

        let mut stats = broker.watch_stats();
        let snapshot = *stats.wait_for(|s| s.subscribers == 2).await.unwrap();
        assert_eq!(snapshot.published, 0);

        broker.publish("x").await.unwrap();
        let snapshot = *stats.wait_for(|s| s.published == 1).await.unwrap();
        assert_eq!(snapshot.delivered, 2);
    }
}
