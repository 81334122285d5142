//! Transport channel over a provider's stdio byte streams.
//!
//! The channel owns both halves of the pipe. It is usually [`split`](TransportChannel::split)
//! so that exactly one task reads while any number of writers take turns on the write half.

use crate::codec::{Framing, McpCodec};
use crate::error::TransportError;
use crate::protocol::JsonRpcMessage;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{trace, warn};

type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// A framed, bidirectional message channel to one provider.
pub struct TransportChannel {
    reader: ChannelReader,
    writer: ChannelWriter,
}

impl TransportChannel {
    /// Wrap a provider's output stream (`reader`) and input stream (`writer`).
    pub fn new<R, W>(provider: &str, reader: R, writer: W, framing: Framing) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            reader: ChannelReader {
                provider: provider.to_string(),
                inner: FramedRead::new(Box::new(reader) as BoxedReader, McpCodec::new(framing)),
            },
            writer: ChannelWriter {
                provider: provider.to_string(),
                inner: FramedWrite::new(Box::new(writer) as BoxedWriter, McpCodec::new(framing)),
            },
        }
    }

    pub fn provider(&self) -> &str {
        &self.reader.provider
    }

    pub async fn send(&mut self, message: JsonRpcMessage) -> Result<(), TransportError> {
        self.writer.send(message).await
    }

    pub async fn receive(&mut self) -> Result<JsonRpcMessage, TransportError> {
        self.reader.receive().await
    }

    pub fn split(self) -> (ChannelReader, ChannelWriter) {
        (self.reader, self.writer)
    }
}

/// Read half of a [`TransportChannel`].
pub struct ChannelReader {
    provider: String,
    inner: FramedRead<BoxedReader, McpCodec>,
}

impl ChannelReader {
    /// Wait for the next complete message.
    ///
    /// Frames that are not JSON-RPC messages are logged and skipped. End of stream
    /// is reported as [`TransportError::Disconnected`].
    pub async fn receive(&mut self) -> Result<JsonRpcMessage, TransportError> {
        loop {
            let frame = match self.inner.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(source)) => {
                    return Err(TransportError::Codec {
                        provider: self.provider.clone(),
                        source,
                    })
                }
                None => {
                    return Err(TransportError::Disconnected {
                        provider: self.provider.clone(),
                    })
                }
            };

            match JsonRpcMessage::from_slice(&frame) {
                Ok(message) => {
                    trace!(provider = %self.provider, bytes = frame.len(), "received frame");
                    return Ok(message);
                }
                Err(e) => {
                    warn!(
                        provider = %self.provider,
                        error = %e,
                        line = %String::from_utf8_lossy(&frame),
                        "skipping non JSON-RPC output from provider"
                    );
                }
            }
        }
    }
}

/// Write half of a [`TransportChannel`].
pub struct ChannelWriter {
    provider: String,
    inner: FramedWrite<BoxedWriter, McpCodec>,
}

impl ChannelWriter {
    /// Frame one message and flush it to the provider.
    pub async fn send(&mut self, message: JsonRpcMessage) -> Result<(), TransportError> {
        self.inner
            .send(message)
            .await
            .map_err(|source| TransportError::Codec {
                provider: self.provider.clone(),
                source,
            })
    }

    /// Flush and shut down the provider's input stream, signalling end of input.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.inner
            .close()
            .await
            .map_err(|source| TransportError::Codec {
                provider: self.provider.clone(),
                source,
            })
    }
}
