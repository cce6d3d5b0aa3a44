//! # ssed-core
//!
//! Broadcast core of the ssed Server-Sent Events daemon.
//!
//! This crate provides the pieces that carry real concurrency concerns:
//!
//! - **Message** - Immutable opaque payload handed to the broker
//! - **SubscriberChannel** - Bounded per-connection delivery queue
//! - **Registry** - Set of active subscriber queues
//! - **Broker** - Single coordination task that owns the registry
//! - **Producer** - Line-oriented sources that feed the broker
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  publish   ┌──────────────┐  try_send  ┌───────────────────┐
//! │ Producer │──────────▶│ Broker loop  │──────────▶│ SubscriberChannel │──▶ handler
//! └──────────┘            │  (Registry)  │            └───────────────────┘
//!                         └──────────────┘
//!                            ▲        ▲
//!                   register │        │ deregister
//!                            └─ connection handlers
//! ```

pub mod broker;
pub mod message;
pub mod producer;
pub mod registry;
pub mod subscriber;

pub use broker::{
    Broker, BrokerConfig, BrokerError, BrokerStats, SlowSubscriberPolicy, DEFAULT_MAX_MESSAGE_SIZE,
};
pub use message::{Message, MessageId};
pub use producer::{Producer, ProducerError, PromptProducer, StreamProducer};
pub use registry::{Fanout, Registry};
pub use subscriber::{SubscriberChannel, SubscriberId};
