//! Newline-delimited JSON framing for [`Event`]s.
//!
//! One event per line. Lines are capped at [`MAX_LINE_LENGTH`] bytes; an
//! oversized line cannot be resynchronised and is reported as a fatal
//! framing error. A line that is framed correctly but does not parse, or
//! carries out-of-range fields, is yielded as an `Err` item so the reader
//! can log it and keep going.

use crate::event::Event;
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Maximum encoded length of one event, excluding the newline.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Underlying transport failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A line grew past [`MAX_LINE_LENGTH`] without a newline
    #[error("Line exceeds {MAX_LINE_LENGTH} bytes")]
    LineTooLong,

    /// Not UTF-8, not JSON, or not a known event shape
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Well-formed event with an out-of-range field
    #[error("Invalid field: {0}")]
    InvalidField(String),

    /// `Hello` with an empty or blank peer id
    #[error("Hello carries an empty peer id")]
    EmptyPeerId,
}

impl CodecError {
    /// Whether the stream is unusable after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, CodecError::Io(_) | CodecError::LineTooLong)
    }
}

/// Encode an event as one JSON line, including the trailing newline.
///
/// # Errors
///
/// Returns an error if the event fails [`Event::validate`] or would exceed
/// [`MAX_LINE_LENGTH`].
pub fn encode_event(event: &Event) -> Result<Bytes, CodecError> {
    event.validate()?;

    let mut json = serde_json::to_vec(event).map_err(|e| CodecError::Malformed(e.to_string()))?;
    if json.len() > MAX_LINE_LENGTH {
        return Err(CodecError::LineTooLong);
    }
    json.push(b'\n');

    Ok(Bytes::from(json))
}

/// Decode one line (without its newline) into a validated event.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] for unparseable input, otherwise any
/// error from [`Event::validate`].
pub fn decode_event(line: &str) -> Result<Event, CodecError> {
    let event: Event =
        serde_json::from_str(line.trim()).map_err(|e| CodecError::Malformed(e.to_string()))?;
    event.validate()?;
    Ok(event)
}

/// `tokio_util` codec producing one item per non-blank line.
#[derive(Debug, Default)]
pub struct EventCodec {
    // Bytes of the buffer already scanned for a newline.
    next_index: usize,
}

impl EventCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_line(line: &[u8]) -> Option<Result<Event, CodecError>> {
        let text = match std::str::from_utf8(line) {
            Ok(text) => text,
            Err(e) => return Some(Err(CodecError::Malformed(e.to_string()))),
        };
        if text.trim().is_empty() {
            return None;
        }
        Some(decode_event(text))
    }
}

impl Decoder for EventCodec {
    type Item = Result<Event, CodecError>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src
                .iter()
                .skip(self.next_index)
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            let Some(newline) = newline else {
                if src.len() > MAX_LINE_LENGTH {
                    return Err(CodecError::LineTooLong);
                }
                self.next_index = src.len();
                return Ok(None);
            };

            self.next_index = 0;
            if newline > MAX_LINE_LENGTH {
                return Err(CodecError::LineTooLong);
            }

            let mut line = src.split_to(newline + 1);
            line.truncate(newline);
            if line.last() == Some(&b'\r') {
                line.truncate(newline.saturating_sub(1));
            }

            if let Some(item) = Self::decode_line(&line) {
                return Ok(Some(item));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        self.next_index = 0;
        if src.is_empty() {
            return Ok(None);
        }
        // Final line without a trailing newline.
        let line = src.split();
        Ok(Self::decode_line(&line))
    }
}

impl Encoder<Event> for EventCodec {
    type Error = CodecError;

    fn encode(&mut self, event: Event, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = encode_event(&event)?;
        dst.reserve(line.len());
        dst.put(line);
        Ok(())
    }
}
