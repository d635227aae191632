//! Turns a stream of frames into a stream of messages and control-frame reactions.
//!
//! Grounded on the Python original's `websocket/client.py` `HANDLERS` dispatch table
//! (`handle_data`/`handle_continuation`/`handle_ping_or_pong`/`handle_close`/`handle_undefined`),
//! reimplemented as a `match` over `OpCode` — the teacher's `src/read.rs::poll_messages` match arms
//! were cross-checked for the fragmentation bookkeeping (`FragmentedMessage`/continuation opcode).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::frame::{FrameHeader, OpCode};
use crate::handler::ConnectionHandler;
use crate::inbound::InboundReader;
use crate::message::{MessageKind, MessageReader};
use crate::outbound::OutboundWriter;
use crate::reasons;
use crate::ring::RingBuffer;
use crate::utf8::Utf8Validator;

/// What the connection loop should do after a frame has been fully processed.
pub enum Dispatch {
    Continue,
    PeerInitiatedClose { code: u16, reason: String },
}

/// Per-connection fragmentation state. One `MessageAssembler` lives for the lifetime of a
/// connection; a fresh in-progress message (ring + validator) is created each time a non-control
/// data frame starts a new message.
pub struct MessageAssembler {
    continuation_kind: Option<OpCode>,
    ring: Option<Arc<RingBuffer>>,
    validator: Option<Utf8Validator>,
    message_bytes: usize,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self { continuation_kind: None, ring: None, validator: None, message_bytes: 0 }
    }

    /// Processes one already-parsed frame header, reading its payload off `reader` as needed.
    pub async fn handle_frame<R, W, H>(
        &mut self,
        header: FrameHeader,
        reader: &mut R,
        peer: SocketAddr,
        outbound: &Arc<OutboundWriter<W>>,
        handler: &Arc<H>,
        config: &WebSocketConfig,
    ) -> Result<Dispatch, Error>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
        H: ConnectionHandler<W>,
    {
        match header.opcode {
            OpCode::Text | OpCode::Binary => {
                if self.continuation_kind.is_some() {
                    // A message is already in flight; this frame can't start a new one. Drain its
                    // payload off the wire so the stream realigns on the next frame boundary, and
                    // surface an exception to the reader the application callback is still holding.
                    InboundReader::drain(reader, header.payload_len as usize).await?;
                    self.abort_in_progress();
                    return Err(Error::FragmentedInProgress);
                }
                self.begin_message(header.opcode, peer, config, handler);
                self.stream_chunk(&header, reader, config).await?;
                if header.final_fragment {
                    self.finish_message()?;
                } else {
                    self.continuation_kind = Some(header.opcode);
                }
                Ok(Dispatch::Continue)
            }
            OpCode::Continue => {
                if self.continuation_kind.is_none() {
                    InboundReader::drain(reader, header.payload_len as usize).await?;
                    return Err(Error::InvalidContinuationFrame);
                }
                self.stream_chunk(&header, reader, config).await?;
                if header.final_fragment {
                    self.finish_message()?;
                    self.continuation_kind = None;
                }
                Ok(Dispatch::Continue)
            }
            OpCode::Ping => {
                let payload = InboundReader::read_control_payload(reader, &header).await?;
                if outbound.is_closed() {
                    return Err(Error::PolicyViolation);
                }
                handler.on_ping(payload, outbound).await;
                Ok(Dispatch::Continue)
            }
            OpCode::Pong => {
                let payload = InboundReader::read_control_payload(reader, &header).await?;
                if outbound.is_closed() {
                    return Err(Error::PolicyViolation);
                }
                handler.on_pong(payload).await;
                Ok(Dispatch::Continue)
            }
            OpCode::Close => {
                let payload = InboundReader::read_control_payload(reader, &header).await?;
                let (code, reason_bytes) = reasons::parse_close_payload(&payload)?;
                let reason = String::from_utf8(reason_bytes.to_vec()).map_err(|_| Error::InvalidCloseReason)?;
                Ok(Dispatch::PeerInitiatedClose { code, reason })
            }
        }
    }

    /// Signals `Error::ClosingMidMessage` to a message reader the application callback is still
    /// draining, if one is in progress, and clears the fragmentation state. A no-op if no message
    /// is in flight, or if the in-progress message's ring was already given a more specific
    /// exception (e.g. `Error::MaxFrameSize`) by `stream_chunk`/`finish_message`.
    pub fn abort_in_progress(&mut self) {
        if let Some(ring) = self.ring.take() {
            ring.set_exception(Error::ClosingMidMessage);
        }
        self.validator = None;
        self.continuation_kind = None;
    }

    fn begin_message<W, H>(&mut self, opcode: OpCode, peer: SocketAddr, config: &WebSocketConfig, handler: &Arc<H>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
        H: ConnectionHandler<W>,
    {
        let ring = Arc::new(RingBuffer::new(config.ring_buffer_capacity));
        let kind = if opcode == OpCode::Text { MessageKind::Text } else { MessageKind::Binary };
        self.validator = (opcode == OpCode::Text).then(Utf8Validator::new);
        self.message_bytes = 0;
        self.ring = Some(Arc::clone(&ring));

        let handler = Arc::clone(handler);
        let message_reader = MessageReader::new(ring, kind);
        tokio::spawn(async move {
            handler.on_message(peer, message_reader).await;
        });
    }

    async fn stream_chunk<R: AsyncRead + Unpin>(
        &mut self,
        header: &FrameHeader,
        reader: &mut R,
        config: &WebSocketConfig,
    ) -> Result<(), Error> {
        if header.payload_len as usize > config.max_frame_size {
            if let Some(ring) = self.ring.take() {
                ring.set_exception(Error::MaxFrameSize(config.max_frame_size));
            }
            self.validator = None;
            self.continuation_kind = None;
            InboundReader::drain(reader, header.payload_len as usize).await?;
            return Err(Error::MaxFrameSize(config.max_frame_size));
        }
        self.message_bytes += header.payload_len as usize;
        if self.message_bytes > config.max_message_size {
            if let Some(ring) = self.ring.take() {
                ring.set_exception(Error::MaxMessageSize(config.max_message_size));
            }
            self.validator = None;
            self.continuation_kind = None;
            InboundReader::drain(reader, header.payload_len as usize).await?;
            return Err(Error::MaxMessageSize(config.max_message_size));
        }

        let ring = self.ring.as_ref().expect("stream_chunk called without an in-progress message");
        InboundReader::stream_into(reader, header, ring, config.receive_chunk_size, self.validator.as_mut()).await
    }

    fn finish_message(&mut self) -> Result<(), Error> {
        if let Some(validator) = &mut self.validator {
            if let Err(utf8_err) = validator.finish() {
                let err = Error::InvalidUtf8 { start: utf8_err.start, end: utf8_err.end };
                if let Some(ring) = &self.ring {
                    ring.set_exception(Error::InvalidUtf8 { start: utf8_err.start, end: utf8_err.end });
                }
                self.ring = None;
                self.validator = None;
                self.continuation_kind = None;
                return Err(err);
            }
        }
        if let Some(ring) = self.ring.take() {
            ring.feed_eof();
        }
        self.validator = None;
        Ok(())
    }
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new()
    }
}
