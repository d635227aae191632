//! Streams a frame's payload off the wire, unmasking in place as it goes.
//!
//! Grounded on the teacher's `src/read.rs::read_frame` payload loop (chunked reads, in-place XOR
//! unmask), generalized to push unmasked chunks into a `RingBuffer` instead of returning one
//! `Vec<u8>` — a single data frame can carry megabytes, and the message reader exposed to
//! application code needs to start draining before the frame has fully arrived.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Error;
use crate::frame::FrameHeader;
use crate::ring::RingBuffer;
use crate::utf8::Utf8Validator;

pub struct InboundReader;

impl InboundReader {
    /// Reads and discards `len` bytes off the wire without unmasking them. Used to realign the
    /// transport on a frame boundary after a frame is rejected mid-payload (or before its payload
    /// is even read), so a subsequent `FrameCodec::read_header` call parses the peer's next real
    /// frame instead of garbage left over from the rejected one.
    pub async fn drain<R: AsyncRead + Unpin>(reader: &mut R, len: usize) -> Result<(), Error> {
        let mut buf = vec![0u8; 4096.min(len.max(1))];
        let mut remaining = len;
        while remaining > 0 {
            let take = remaining.min(buf.len());
            reader.read_exact(&mut buf[..take]).await?;
            remaining -= take;
        }
        Ok(())
    }

    /// Reads a control frame's payload in full and unmasks it. Control payloads are capped at 125
    /// bytes by `FrameCodec::read_header`, so there's no benefit to streaming them through a ring.
    pub async fn read_control_payload<R: AsyncRead + Unpin>(
        reader: &mut R,
        header: &FrameHeader,
    ) -> Result<Vec<u8>, Error> {
        let len = header.payload_len as usize;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        if let Some(mask) = header.mask {
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte ^= mask[i % 4];
            }
        }
        Ok(buf)
    }

    /// Streams a data frame's payload into `ring` in `chunk_size`-sized pieces, unmasking each
    /// chunk before writing it. Does not call `ring.feed_eof()` — the assembler decides when a
    /// message (possibly spanning several continuation frames) is complete.
    ///
    /// When `validator` is present (a Text message in progress), each unmasked chunk is fed to it
    /// before being written to the ring, so an invalid UTF-8 sequence is caught as it streams off
    /// the wire rather than after the whole message has already been handed to application code.
    pub async fn stream_into<R: AsyncRead + Unpin>(
        reader: &mut R,
        header: &FrameHeader,
        ring: &RingBuffer,
        chunk_size: usize,
        mut validator: Option<&mut Utf8Validator>,
    ) -> Result<(), Error> {
        let mask = header.mask.unwrap_or([0, 0, 0, 0]);
        let mut remaining = header.payload_len as usize;
        let mut mask_offset = 0usize;
        let mut buf = vec![0u8; chunk_size.min(remaining.max(1))];

        while remaining > 0 {
            let take = remaining.min(buf.len());
            reader.read_exact(&mut buf[..take]).await?;
            for (i, byte) in buf[..take].iter_mut().enumerate() {
                *byte ^= mask[(mask_offset + i) % 4];
            }
            mask_offset += take;
            remaining -= take;
            if let Some(validator) = validator.as_deref_mut() {
                if let Err(utf8_err) = validator.feed(&buf[..take]) {
                    let err = Error::InvalidUtf8 { start: utf8_err.start, end: utf8_err.end };
                    ring.set_exception(Error::InvalidUtf8 { start: utf8_err.start, end: utf8_err.end });
                    Self::drain(reader, remaining).await?;
                    return Err(err);
                }
            }
            ring.write(&buf[..take]).await;
        }
        Ok(())
    }
}
