//! # ssed-protocol
//!
//! Server-Sent Events framing for ssed.
//!
//! Every broadcast message travels as one event, terminated by a blank line,
//! so clients can always tell where one message ends and the next begins.
//!
//! ## Frame Types
//!
//! - `Data` - One broadcast message, written as `data:` lines
//! - `Comment` - Ignored by clients; used as a keep-alive heartbeat
//! - `Retry` - Reconnection delay hint for `EventSource` clients
//!
//! ## Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use ssed_protocol::{codec, Frame};
//!
//! let encoded = codec::encode(&Frame::data("hello\nworld")).unwrap();
//! assert_eq!(&encoded[..], b"data: hello\ndata: world\n\n");
//!
//! let mut buf = BytesMut::from(&encoded[..]);
//! let decoded = codec::decode_from(&mut buf).unwrap();
//! assert_eq!(decoded, Some(Frame::data("hello\nworld")));
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, decode_from, encode, ProtocolError};
pub use frames::{Frame, FrameType};

/// MIME type of an event stream response.
pub const CONTENT_TYPE: &str = "text/event-stream";
