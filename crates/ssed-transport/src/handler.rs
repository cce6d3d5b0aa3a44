//! Connection handler lifecycle.
//!
//! Every subscriber connection walks `Connecting → Streaming → Closed`:
//!
//! - **Connecting** - [`ConnectionHandler::accept`] refuses transports that
//!   cannot stream, then registers a subscriber channel with the broker.
//! - **Streaming** - [`Session::run`] relays each broadcast message as one
//!   flushed event, sends heartbeats, and watches for disconnect and shutdown.
//! - **Closed** - the session's registration guard is dropped, which
//!   deregisters the channel exactly once on every exit path.

use ssed_core::{Broker, SubscriberChannel, SubscriberId};
use ssed_protocol::Frame;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::traits::{EventSink, TransportError};

/// Handler errors.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The transport cannot perform incremental flushed writes.
    #[error("Streaming unsupported!")]
    TransportUnsupported,

    /// Writing to the subscriber failed mid-stream.
    #[error("Write to subscriber failed: {0}")]
    WriteFailure(#[source] TransportError),
}

/// Why a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer went away.
    Disconnected,
    /// The broker dropped the subscriber, e.g. for falling behind.
    Evicted,
    /// The process is shutting down.
    Shutdown,
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Connecting,
    Streaming,
    Closed,
}

/// Per-connection settings.
#[derive(Debug, Clone, Default)]
pub struct HandlerConfig {
    /// Interval between keep-alive comments; `None` disables them.
    pub heartbeat_interval: Option<Duration>,
    /// Reconnection hint sent when the stream opens.
    pub retry: Option<Duration>,
}

/// Admits subscriber connections and builds their sessions.
#[derive(Debug, Clone)]
pub struct ConnectionHandler {
    broker: Broker,
    config: HandlerConfig,
    shutdown: CancellationToken,
}

impl ConnectionHandler {
    /// Create a handler feeding connections from `broker`.
    #[must_use]
    pub fn new(broker: Broker, config: HandlerConfig) -> Self {
        Self {
            broker,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Close every session when `token` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Get the broker connections are registered with.
    #[must_use]
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Check the transport and register a subscriber for it.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::TransportUnsupported`] without registering if
    /// the sink cannot stream.
    pub fn accept<S: EventSink>(&self, sink: S) -> Result<Session<S>, HandlerError> {
        debug!(connection = %sink.id(), state = ?HandlerState::Connecting, "Connection opened");

        if !sink.supports_streaming() {
            warn!(connection = %sink.id(), "Transport cannot stream, connection refused");
            return Err(HandlerError::TransportUnsupported);
        }

        let channel = self.broker.register();
        let registration = Registration {
            broker: self.broker.clone(),
            id: channel.id(),
        };

        info!(
            connection = %sink.id(),
            subscriber = %channel.id(),
            remote = sink.remote_addr().as_deref().unwrap_or("-"),
            "Subscriber connected"
        );

        Ok(Session {
            sink,
            channel,
            registration,
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            state: HandlerState::Streaming,
        })
    }

    /// Accept `sink` and relay to it until the connection ends.
    ///
    /// # Errors
    ///
    /// See [`ConnectionHandler::accept`] and [`Session::run`].
    pub async fn handle<S: EventSink>(&self, sink: S) -> Result<CloseReason, HandlerError> {
        self.accept(sink)?.run().await
    }
}

/// Deregisters its subscriber when dropped.
#[derive(Debug)]
struct Registration {
    broker: Broker,
    id: SubscriberId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.broker.deregister(self.id);
        debug!(subscriber = %self.id, state = ?HandlerState::Closed, "Subscriber deregistered");
    }
}

/// A registered connection, ready to stream.
///
/// Dropping a session at any point (including an aborted task) deregisters
/// its subscriber.
#[derive(Debug)]
pub struct Session<S> {
    sink: S,
    channel: SubscriberChannel,
    registration: Registration,
    config: HandlerConfig,
    shutdown: CancellationToken,
    state: HandlerState,
}

impl<S: EventSink> Session<S> {
    /// Get the subscriber this session relays for.
    #[must_use]
    pub fn subscriber_id(&self) -> SubscriberId {
        self.registration.id
    }

    /// Get the lifecycle state.
    #[must_use]
    pub fn state(&self) -> HandlerState {
        self.state
    }

    /// Relay messages until the connection closes.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::WriteFailure`] if a write to the peer fails.
    /// The subscriber is deregistered in every case.
    pub async fn run(mut self) -> Result<CloseReason, HandlerError> {
        let result = self.stream().await;
        self.state = HandlerState::Closed;

        match &result {
            Ok(reason) => info!(
                connection = %self.sink.id(),
                subscriber = %self.registration.id,
                reason = ?reason,
                "Subscriber closed"
            ),
            Err(e) => warn!(
                connection = %self.sink.id(),
                subscriber = %self.registration.id,
                error = %e,
                "Subscriber closed"
            ),
        }

        result
    }

    async fn stream(&mut self) -> Result<CloseReason, HandlerError> {
        if let Some(retry) = self.config.retry {
            self.write(Frame::retry(retry.as_millis() as u64)).await?;
        }

        let mut heartbeat = self.config.heartbeat_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            let frame = tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => return Ok(CloseReason::Shutdown),

                _ = self.sink.closed() => return Ok(CloseReason::Disconnected),

                message = self.channel.recv() => match message {
                    Some(message) => Frame::Data(message.into_payload()),
                    None => return Ok(CloseReason::Evicted),
                },

                _ = next_tick(&mut heartbeat) => Frame::heartbeat(),
            };

            self.write(frame).await?;
        }
    }

    async fn write(&mut self, frame: Frame) -> Result<(), HandlerError> {
        match self.sink.send(frame).await {
            Ok(()) => Ok(()),
            // Nothing reached the peer, so the stream is still intact.
            Err(TransportError::Protocol(e)) => {
                warn!(
                    connection = %self.sink.id(),
                    subscriber = %self.registration.id,
                    error = %e,
                    "Event cannot be framed, skipped"
                );
                Ok(())
            }
            Err(e) => Err(HandlerError::WriteFailure(e)),
        }
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
