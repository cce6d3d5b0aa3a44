//! Message type handed from producers to the broker.
//!
//! The payload is opaque: the core never looks inside it.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A unique message identifier.
pub type MessageId = u64;

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a process-unique message ID.
#[must_use]
pub fn generate_message_id() -> MessageId {
    NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// An immutable broadcast message.
///
/// Cloning is cheap: the payload is reference counted, so fan-out to many
/// subscribers shares a single allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: MessageId,
    payload: Bytes,
    timestamp: u64,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            id: generate_message_id(),
            payload: payload.into(),
            timestamp: now_millis(),
        }
    }

    /// Diagnostic identifier, unique within the process.
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Get the payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Milliseconds since the Unix epoch at creation.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Get the payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Consume the message, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl From<&'static str> for Message {
    fn from(s: &'static str) -> Self {
        Self::new(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<Vec<u8>> for Message {
    fn from(v: Vec<u8>) -> Self {
        Self::new(v)
    }
}

impl From<Bytes> for Message {
    fn from(b: Bytes) -> Self {
        Self::new(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::new(b"hello".to_vec());
        assert_eq!(&msg.payload()[..], b"hello");
        assert_eq!(msg.len(), 5);
        assert!(!msg.is_empty());
        assert!(msg.timestamp() > 0);
    }

    #[test]
    fn test_unique_message_ids() {
        let a = Message::from("a");
        let b = Message::from("a");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_clone_shares_payload() {
        let msg = Message::from(vec![7u8; 1024]);
        let copy = msg.clone();
        assert_eq!(msg.payload().as_ptr(), copy.payload().as_ptr());
    }
}
