//! Server-Sent Events transport over an axum response body.
//!
//! [`channel`] pairs a [`SseSink`], driven by the connection handler, with a
//! [`SseStream`] that becomes the HTTP response body. Each frame sent on the
//! sink is one body chunk, which hyper writes out as soon as it is produced.
//! When the client goes away hyper drops the body, the sink observes the
//! closed queue, and the handler ends the session.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderValue, Version};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::Stream;
use ssed_protocol::{codec, Frame};
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::trace;

use crate::traits::{ConnectionId, EventSink, TransportError};

/// Create a sink/body pair for one event stream response.
///
/// `buffer` is the number of encoded events that may wait for hyper to write
/// them before [`SseSink::send`] starts waiting.
#[must_use]
pub fn channel(version: Version, buffer: usize) -> (SseSink, SseStream) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let sink = SseSink {
        id: ConnectionId::generate(),
        tx,
        version,
        remote_addr: None,
    };
    (sink, SseStream { rx, version })
}

/// Whether an HTTP version can carry an incrementally flushed body.
///
/// HTTP/1.0 bodies are delimited by closing the connection, which still
/// lets each event go out as it is written. HTTP/0.9 has no response
/// headers, so the event stream content type cannot be announced.
#[must_use]
pub fn supports_streaming(version: Version) -> bool {
    version != Version::HTTP_09
}

/// Writing half of an event stream response.
#[derive(Debug)]
pub struct SseSink {
    id: ConnectionId,
    tx: mpsc::Sender<Bytes>,
    version: Version,
    remote_addr: Option<String>,
}

impl SseSink {
    /// Attach the peer address for logging.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }
}

#[async_trait]
impl EventSink for SseSink {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn supports_streaming(&self) -> bool {
        supports_streaming(self.version)
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let data = codec::encode(&frame)?;
        trace!(connection = %self.id, bytes = data.len(), "Writing event");
        self.tx
            .send(data)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn closed(&mut self) {
        self.tx.closed().await;
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.clone()
    }
}

/// Body half of an event stream response.
#[derive(Debug)]
pub struct SseStream {
    rx: mpsc::Receiver<Bytes>,
    version: Version,
}

impl Stream for SseStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|chunk| chunk.map(Ok))
    }
}

impl IntoResponse for SseStream {
    fn into_response(self) -> Response {
        let version = self.version;
        let mut response = Body::from_stream(self).into_response();

        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(ssed_protocol::CONTENT_TYPE),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        // Connection-specific headers are forbidden from HTTP/2 on.
        if version == Version::HTTP_11 {
            headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        }

        response
    }
}
