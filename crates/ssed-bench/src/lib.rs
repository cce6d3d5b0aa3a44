//! Shared fixtures for the ssed benchmarks.

use bytes::Bytes;
use ssed_core::{Broker, BrokerConfig, Registry, SubscriberChannel};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

/// Payload sizes used across benchmarks.
pub const PAYLOAD_SIZES: [usize; 3] = [64, 1024, 16 * 1024];

/// A payload of `size` printable bytes.
#[must_use]
pub fn payload(size: usize) -> Bytes {
    Bytes::from(vec![b'x'; size])
}

/// Multi-threaded runtime for async benchmarks.
///
/// # Panics
///
/// Panics if the runtime cannot be built.
#[must_use]
pub fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime")
}

/// A registry of `size` members, with the receiving halves to drain.
#[must_use]
pub fn registry(size: usize, capacity: usize) -> (Registry, Vec<SubscriberChannel>) {
    let mut registry = Registry::new();
    let channels = (0..size)
        .map(|_| {
            let (channel, sender) = SubscriberChannel::new(capacity);
            registry.insert(channel.id(), sender);
            channel
        })
        .collect();
    (registry, channels)
}

/// Spawn a broker with `subscribers` members that consume as fast as they can.
///
/// Must be called from within a runtime.
#[must_use]
pub fn broker_with_readers(subscribers: usize) -> (Broker, Vec<JoinHandle<u64>>) {
    let broker = Broker::spawn(BrokerConfig::default());
    let readers = (0..subscribers)
        .map(|_| {
            let mut channel = broker.register();
            tokio::spawn(async move {
                let mut received = 0;
                while channel.recv().await.is_some() {
                    received += 1;
                }
                received
            })
        })
        .collect();
    (broker, readers)
}
