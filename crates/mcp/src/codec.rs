//! Wire framing for provider stdio streams.
//!
//! Two framings are supported: newline-delimited JSON (one message per line) and
//! LSP-style `Content-Length` headers. The decoder yields raw frame bodies; turning a
//! body into a [`JsonRpcMessage`] is left to the transport so a stray log line on a
//! provider's stdout does not poison the stream.

use crate::protocol::JsonRpcMessage;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

/// Largest frame accepted from a provider.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Upper bound on a `Content-Length` header block.
const MAX_HEADER_LEN: usize = 4096;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// How messages are delimited on a provider's stdio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// One JSON document per `\n`-terminated line.
    #[default]
    Lines,
    /// `Content-Length: N\r\n\r\n` followed by exactly N bytes of JSON.
    ContentLength,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    #[error("invalid frame header: {0}")]
    InvalidHeader(String),

    #[error("stream ended in the middle of a frame")]
    Truncated,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Head,
    Body(usize),
}

/// Frames JSON-RPC messages onto and off a byte stream.
#[derive(Debug)]
pub struct McpCodec {
    framing: Framing,
    state: DecodeState,
    max_frame_len: usize,
}

impl McpCodec {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            state: DecodeState::Head,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    fn decode_line(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, CodecError> {
        loop {
            let Some(newline) = src.iter().position(|&b| b == b'\n') else {
                if src.len() > self.max_frame_len {
                    return Err(CodecError::FrameTooLarge {
                        len: src.len(),
                        max: self.max_frame_len,
                    });
                }
                return Ok(None);
            };

            if newline > self.max_frame_len {
                return Err(CodecError::FrameTooLarge {
                    len: newline,
                    max: self.max_frame_len,
                });
            }

            let mut line = src.split_to(newline + 1);
            line.truncate(newline);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }

            // Blank keep-alive lines carry nothing.
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(line.freeze()));
        }
    }

    fn decode_content_length(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, CodecError> {
        loop {
            match self.state {
                DecodeState::Head => {
                    // Tolerate stray line endings between frames.
                    while matches!(src.first(), Some(b'\r' | b'\n')) {
                        src.advance(1);
                    }

                    let Some(end) = src
                        .windows(HEADER_TERMINATOR.len())
                        .position(|window| window == HEADER_TERMINATOR)
                    else {
                        if src.len() > MAX_HEADER_LEN {
                            return Err(CodecError::InvalidHeader("header block too large".into()));
                        }
                        return Ok(None);
                    };

                    let header = src.split_to(end + HEADER_TERMINATOR.len());
                    let len = parse_content_length(&header[..end])?;
                    if len > self.max_frame_len {
                        return Err(CodecError::FrameTooLarge {
                            len,
                            max: self.max_frame_len,
                        });
                    }
                    self.state = DecodeState::Body(len);
                }
                DecodeState::Body(len) => {
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }
                    self.state = DecodeState::Head;
                    return Ok(Some(src.split_to(len).freeze()));
                }
            }
        }
    }
}

impl Default for McpCodec {
    fn default() -> Self {
        Self::new(Framing::default())
    }
}

fn parse_content_length(header: &[u8]) -> Result<usize, CodecError> {
    let header = std::str::from_utf8(header)
        .map_err(|_| CodecError::InvalidHeader("header is not valid UTF-8".into()))?;

    for line in header.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            return value
                .trim()
                .parse::<usize>()
                .map_err(|_| CodecError::InvalidHeader(format!("bad Content-Length '{}'", value.trim())));
        }
    }

    Err(CodecError::InvalidHeader("missing Content-Length".into()))
}

impl Decoder for McpCodec {
    type Item = Bytes;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.framing {
            Framing::Lines => self.decode_line(src),
            Framing::ContentLength => self.decode_content_length(src),
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if buf.iter().all(u8::is_ascii_whitespace) {
            buf.clear();
            return Ok(None);
        }
        match self.framing {
            // The last line of a stream need not be newline-terminated.
            Framing::Lines => Ok(Some(buf.split().freeze())),
            Framing::ContentLength => {
                buf.clear();
                Err(CodecError::Truncated)
            }
        }
    }
}

impl Encoder<JsonRpcMessage> for McpCodec {
    type Error = CodecError;

    fn encode(&mut self, item: JsonRpcMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = item.to_vec()?;
        match self.framing {
            Framing::Lines => {
                dst.reserve(body.len() + 1);
                dst.put_slice(&body);
                dst.put_u8(b'\n');
            }
            Framing::ContentLength => {
                let header = format!("Content-Length: {}\r\n\r\n", body.len());
                dst.reserve(header.len() + body.len());
                dst.put_slice(header.as_bytes());
                dst.put_slice(&body);
            }
        }
        Ok(())
    }
}
