//! Message producers.
//!
//! Producers turn an external line-oriented source into broker publishes:
//! every line becomes exactly one [`Message`], in the order it was read.
//! The two implementations here are interchangeable behind [`Producer`]:
//!
//! - [`StreamProducer`] reads passively until end of input.
//! - [`PromptProducer`] shows an interactive prompt with the subscriber count.

use crate::broker::{Broker, BrokerError};
use crate::message::Message;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Producer errors.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// Reading from the message source failed.
    #[error("Failed to read from message source: {0}")]
    Read(#[source] std::io::Error),

    /// Writing the interactive prompt failed.
    #[error("Failed to write prompt: {0}")]
    Write(#[source] std::io::Error),

    /// The broker stopped accepting messages.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// A source of broadcast messages.
#[async_trait]
pub trait Producer: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Feed messages to `broker` until the source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails or the broker is gone.
    async fn run(&mut self, broker: &Broker) -> Result<(), ProducerError>;
}

/// Read one line into `buf`, returning `false` at end of input.
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<bool, ProducerError>
where
    R: AsyncBufRead + Unpin + Send,
{
    buf.clear();
    let n = reader
        .read_until(b'\n', buf)
        .await
        .map_err(ProducerError::Read)?;
    if n == 0 {
        return Ok(false);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(true)
}

/// A line over the broker's size limit is logged and skipped; any other
/// publish failure ends the producer.
fn skip_oversized(error: BrokerError) -> Result<(), ProducerError> {
    match error {
        BrokerError::TooLarge { size, max } => {
            warn!(size, max, "Line exceeds maximum message size, skipped");
            Ok(())
        }
        e => Err(e.into()),
    }
}

/// Publishes every line of a byte stream, e.g. standard input.
#[derive(Debug)]
pub struct StreamProducer<R> {
    reader: R,
}

impl<R> StreamProducer<R> {
    /// Create a producer over `reader`.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R> Producer for StreamProducer<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    fn name(&self) -> &'static str {
        "stream"
    }

    async fn run(&mut self, broker: &Broker) -> Result<(), ProducerError> {
        info!("Reading messages from input stream");

        let mut line = Vec::new();
        while read_line(&mut self.reader, &mut line).await? {
            let message = Message::new(Bytes::copy_from_slice(&line));
            let id = message.id();
            if let Err(e) = broker.publish(message).await {
                skip_oversized(e)?;
                continue;
            }
            debug!(
                message = id,
                subscribers = broker.stats().subscribers,
                line = %String::from_utf8_lossy(&line),
                "Published line"
            );
        }

        info!("Input stream ended");
        Ok(())
    }
}

/// Interactive prompt: shows the subscriber count, publishes each non-empty
/// line and echoes it back.
#[derive(Debug)]
pub struct PromptProducer<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> PromptProducer<R, W> {
    /// Create a prompt reading from `reader` and writing to `writer`.
    #[must_use]
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Consume the producer, returning the prompt output.
    #[must_use]
    pub fn into_writer(self) -> W {
        self.writer
    }
}

impl<R, W> PromptProducer<R, W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, text: &str) -> Result<(), ProducerError> {
        self.writer
            .write_all(text.as_bytes())
            .await
            .map_err(ProducerError::Write)?;
        self.writer.flush().await.map_err(ProducerError::Write)
    }
}

#[async_trait]
impl<R, W> Producer for PromptProducer<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &'static str {
        "prompt"
    }

    async fn run(&mut self, broker: &Broker) -> Result<(), ProducerError> {
        let mut line = Vec::new();
        loop {
            let prompt = format!("({} clients)-> ", broker.stats().subscribers);
            self.write(&prompt).await?;

            if !read_line(&mut self.reader, &mut line).await? {
                break;
            }
            if line.is_empty() {
                continue;
            }

            let echo = match broker.publish(Bytes::copy_from_slice(&line)).await {
                Ok(()) => format!("Sent message: {}\n", String::from_utf8_lossy(&line)),
                Err(e) => {
                    skip_oversized(e)?;
                    format!("Message too large ({} bytes), not sent\n", line.len())
                }
            };
            self.write(&echo).await?;
        }

        self.write("\n").await?;
        info!("Prompt input ended");
        Ok(())
    }
}
