//! Incremental UTF-8 validation for streamed Text message payloads.
//!
//! The teacher validates UTF-8 once, on the fully reassembled message (`String::from_utf8` in
//! `message.rs`). That doesn't fit a streamed ring buffer where a multi-byte codepoint can
//! straddle two frames, or two chunks of the same frame. The Python original validates the same
//! way we do here: incrementally, one chunk at a time, via
//! `codecs.getincrementaldecoder('utf8')` (`websocket/stream/reader.py`). No module in the teacher
//! needs this; `utf-8` is the crate the rest of the pack reaches for here (`snapview-tungstenite-rs`,
//! `Risuleia-blitz`) rather than hand-rolling a decoder.

use utf8::{decode, DecodeError, Incomplete};

/// The position (byte offset within the message so far) of the first invalid byte, and how many
/// bytes the invalid sequence spans — mirrors the Python original's
/// `f"{e.object[e.start:e.end]} at {e.start}-{e.end}"` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utf8Error {
    pub start: usize,
    pub end: usize,
}

pub struct Utf8Validator {
    incomplete: Option<Incomplete>,
    offset: usize,
}

impl Utf8Validator {
    pub fn new() -> Self {
        Self { incomplete: None, offset: 0 }
    }

    /// Feeds the next chunk of a Text message's payload. Call `finish` once the message's final
    /// frame has been consumed to catch a codepoint left dangling at the end of the message.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), Utf8Error> {
        let mut input = chunk;
        let mut carried = 0;

        if let Some(mut incomplete) = self.incomplete.take() {
            match incomplete.try_complete(input) {
                None => {
                    // Still not enough bytes to resolve the dangling sequence.
                    self.incomplete = Some(incomplete);
                    self.offset += input.len();
                    return Ok(());
                }
                Some((Err(invalid), _rest)) => {
                    let end = self.offset + invalid.len();
                    return Err(Utf8Error { start: self.offset, end });
                }
                Some((Ok(valid), rest)) => {
                    carried = valid.len();
                    input = rest;
                }
            }
        }
        self.offset += carried;

        match decode(input) {
            Ok(valid) => {
                self.offset += valid.len();
                Ok(())
            }
            Err(DecodeError::Invalid { valid_prefix, invalid_sequence, .. }) => {
                let start = self.offset + valid_prefix.len();
                Err(Utf8Error { start, end: start + invalid_sequence.len() })
            }
            Err(DecodeError::Incomplete { valid_prefix, incomplete_suffix }) => {
                self.offset += valid_prefix.len();
                self.incomplete = Some(incomplete_suffix);
                Ok(())
            }
        }
    }

    /// Finalizes validation at message end. A codepoint left incomplete after the final frame is
    /// an error, equivalent to passing `final=True` to the Python incremental decoder.
    pub fn finish(&mut self) -> Result<(), Utf8Error> {
        if self.incomplete.take().is_some() {
            return Err(Utf8Error { start: self.offset, end: self.offset });
        }
        Ok(())
    }
}

impl Default for Utf8Validator {
    fn default() -> Self {
        Self::new()
    }
}
