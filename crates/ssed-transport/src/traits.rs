//! Transport abstraction traits for ssed.
//!
//! The connection handler only needs two things from a transport: a way to
//! push one event and have it reach the peer right away, and a way to learn
//! that the peer went away.

use async_trait::async_trait;
use ssed_protocol::{Frame, ProtocolError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection, used in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Generate a process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let n = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{n:x}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Frame could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Outbound side of one subscriber connection.
#[async_trait]
pub trait EventSink: Send {
    /// Get the connection's identifier.
    fn id(&self) -> &ConnectionId;

    /// Whether the transport can perform incremental, explicitly flushed
    /// writes. Connections that cannot are refused before registration.
    fn supports_streaming(&self) -> bool;

    /// Write one frame and push it to the peer immediately.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Resolve once the peer has disconnected.
    ///
    /// Must be cancel-safe: it is raced against other events and dropped
    /// whenever another branch wins.
    async fn closed(&mut self);

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}
