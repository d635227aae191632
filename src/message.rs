//! The handle application code receives for an inbound message, and the owned, fully-materialized
//! message type built on top of it.
//!
//! Grounded on the teacher's `src/message.rs` (`Message::Text`/`Message::Binary`), generalized into
//! a streaming `MessageReader` over the consumer side of a `RingBuffer`, modeled on the Python
//! original's `WebSocketReader.get()` (`websocket/stream/reader.py`). UTF-8 validation already
//! happened on the producer side (`MessageAssembler`, as frame payload bytes streamed in), so a
//! `MessageReader` for a Text message never has to re-check encoding — it just drains bytes.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::Error;
use crate::ring::{RingBuffer, RingError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

/// A live handle onto an inbound message's payload. Handed to `ConnectionHandler::on_message`
/// while the message may still be arriving — reading it drives backpressure all the way back to
/// the socket, since the ring buffer the assembler is filling has bounded capacity.
pub struct MessageReader {
    ring: Arc<RingBuffer>,
    kind: MessageKind,
}

impl MessageReader {
    pub(crate) fn new(ring: Arc<RingBuffer>, kind: MessageKind) -> Self {
        Self { ring, kind }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Reads up to `buf.len()` bytes, returning `Ok(0)` once the message is fully drained.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let len = buf.len();
        self.ring.read_into(buf, len, 0).await.map_err(RingError::into_error)
    }

    /// Drains the entire remaining message into one buffer. Fine for request/response workloads;
    /// callers streaming very large messages should prefer `read_chunk` in a loop instead.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = self.read_chunk(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }
}

/// A fully materialized inbound or outbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    /// Drains a `MessageReader` to completion and decodes it per its kind. Text messages are
    /// decoded with `String::from_utf8` purely as a type conversion — the bytes are already
    /// guaranteed valid UTF-8 by the producer-side `Utf8Validator`, so this can never fail in
    /// practice, but the fallible conversion is kept rather than reaching for `unsafe` or
    /// `from_utf8_unchecked`.
    pub async fn from_reader(mut reader: MessageReader) -> Result<Self, Error> {
        let bytes = reader.read_to_end().await?;
        match reader.kind() {
            MessageKind::Binary => Ok(Message::Binary(bytes)),
            MessageKind::Text => Ok(Message::Text(String::from_utf8(bytes)?)),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(s) => Some(s),
            Message::Binary(_) => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Message::Binary(b) => Some(b),
            Message::Text(_) => None,
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Message::Text(s) => Bytes::from(s.into_bytes()),
            Message::Binary(b) => Bytes::from(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn reads_full_text_message() {
        let ring = Arc::new(RingBuffer::new(64));
        ring.write(b"hello").await;
        ring.feed_eof();
        let reader = MessageReader::new(ring, MessageKind::Text);
        let message = Message::from_reader(reader).await.unwrap();
        assert_eq!(message.as_text(), Some("hello"));
    }

    #[tokio::test]
    async fn reads_full_binary_message() {
        let ring = Arc::new(RingBuffer::new(64));
        ring.write(&[1, 2, 3]).await;
        ring.feed_eof();
        let reader = MessageReader::new(ring, MessageKind::Binary);
        let message = Message::from_reader(reader).await.unwrap();
        assert_eq!(message.as_binary(), Some(&[1u8, 2, 3][..]));
    }
}
