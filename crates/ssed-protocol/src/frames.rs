//! Frame types for the event stream.

use bytes::Bytes;

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Data,
    Comment,
    Retry,
}

/// A single event on the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One broadcast message. The payload is opaque; line breaks inside it
    /// are carried as separate `data:` lines.
    Data(Bytes),

    /// Comment text, ignored by `EventSource` clients.
    Comment(String),

    /// Reconnection delay hint in milliseconds.
    Retry(u64),
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Data(_) => FrameType::Data,
            Frame::Comment(_) => FrameType::Comment,
            Frame::Retry(_) => FrameType::Retry,
        }
    }

    /// Create a data frame.
    #[must_use]
    pub fn data(payload: impl Into<Bytes>) -> Self {
        Frame::Data(payload.into())
    }

    /// Create a comment frame.
    #[must_use]
    pub fn comment(text: impl Into<String>) -> Self {
        Frame::Comment(text.into())
    }

    /// Create a heartbeat frame.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::comment("keep-alive")
    }

    /// Create a retry frame.
    #[must_use]
    pub fn retry(millis: u64) -> Self {
        Frame::Retry(millis)
    }

    /// Payload of a data frame.
    #[must_use]
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            Frame::Data(payload) => Some(payload),
            _ => None,
        }
    }
}

impl From<Bytes> for Frame {
    fn from(payload: Bytes) -> Self {
        Frame::Data(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_types() {
        assert_eq!(Frame::data("x").frame_type(), FrameType::Data);
        assert_eq!(Frame::heartbeat().frame_type(), FrameType::Comment);
        assert_eq!(Frame::retry(3000).frame_type(), FrameType::Retry);
    }

    #[test]
    fn test_payload_accessor() {
        assert_eq!(Frame::data("x").payload().map(|p| &p[..]), Some(&b"x"[..]));
        assert!(Frame::retry(1).payload().is_none());
    }
}
