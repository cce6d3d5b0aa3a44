//! # ssed-transport
//!
//! Transport layer for ssed.
//!
//! - **EventSink** - What a connection must offer: flushed writes and a
//!   disconnect notification
//! - **SseSink** - `text/event-stream` HTTP response body built on axum
//! - **ConnectionHandler** - Per-subscriber lifecycle: register, relay,
//!   always deregister
//!
//! ```rust,ignore
//! use ssed_transport::{sse, ConnectionHandler};
//!
//! async fn events(handler: ConnectionHandler, version: Version) -> Response {
//!     let (sink, stream) = sse::channel(version, 16);
//!     match handler.accept(sink) {
//!         Ok(session) => {
//!             tokio::spawn(session.run());
//!             stream.into_response()
//!         }
//!         Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
//!     }
//! }
//! ```

pub mod handler;
pub mod sse;
pub mod traits;

pub use handler::{CloseReason, ConnectionHandler, HandlerConfig, HandlerError, HandlerState, Session};
pub use sse::{SseSink, SseStream};
pub use traits::{ConnectionId, EventSink, TransportError};
