//! Codec for encoding and decoding event stream frames.
//!
//! Encoding follows the `text/event-stream` format: one `field: value` line
//! per line of content, and a blank line ending the event. Decoding accepts
//! `\n` and `\r\n` line endings and is used by clients and tests reading a
//! stream back.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Maximum encoded event size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const DATA_PREFIX: &[u8] = b"data: ";
const COMMENT_PREFIX: &[u8] = b": ";

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Event exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode an event.
    #[error("Incomplete frame")]
    Incomplete,

    /// Malformed field.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Split content on `\r\n`, `\n` or `\r`. Always yields at least one line.
fn split_lines(content: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < content.len() {
        match content[i] {
            b'\n' => {
                lines.push(&content[start..i]);
                i += 1;
                start = i;
            }
            b'\r' => {
                lines.push(&content[start..i]);
                i += if content.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                start = i;
            }
            _ => i += 1,
        }
    }
    lines.push(&content[start..]);
    lines
}

fn encoded_len(frame: &Frame) -> usize {
    match frame {
        Frame::Data(payload) => {
            let lines = split_lines(payload);
            payload.len() + lines.len() * (DATA_PREFIX.len() + 1) + 1
        }
        Frame::Comment(text) => {
            let lines = split_lines(text.as_bytes());
            text.len() + lines.len() * (COMMENT_PREFIX.len() + 1) + 1
        }
        Frame::Retry(_) => 32,
    }
}

/// Encode a frame to bytes.
///
/// Line terminators inside a payload are normalised: `\r\n`, `\n` and a
/// lone `\r` all end a `data:` line, and a decoder rejoins the lines with
/// `\n`. A payload of `"a\r"` therefore reads back as `"a\n"`.
///
/// # Errors
///
/// Returns an error if the encoded event would exceed [`MAX_FRAME_SIZE`].
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(encoded_len(frame));
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the encoded event would exceed [`MAX_FRAME_SIZE`].
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let size = encoded_len(frame);
    if size > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(size));
    }
    buf.reserve(size);

    match frame {
        Frame::Data(payload) => {
            for line in split_lines(payload) {
                buf.put_slice(DATA_PREFIX);
                buf.put_slice(line);
                buf.put_u8(b'\n');
            }
        }
        Frame::Comment(text) => {
            for line in split_lines(text.as_bytes()) {
                buf.put_slice(COMMENT_PREFIX);
                buf.put_slice(line);
                buf.put_u8(b'\n');
            }
        }
        Frame::Retry(millis) => {
            buf.put_slice(format!("retry: {millis}\n").as_bytes());
        }
    }
    buf.put_u8(b'\n');

    Ok(())
}

/// Decode exactly one frame from bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::Incomplete`] if `data` does not contain a full
/// event, or another error if the event is malformed.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    let mut buf = BytesMut::from(data);
    decode_from(&mut buf)?.ok_or(ProtocolError::Incomplete)
}

/// Find the next complete line starting at `from`.
///
/// Returns the line content range end and the offset just past the line
/// terminator, or `None` if no terminator has arrived yet.
fn next_line(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let newline = buf[from..].iter().position(|&b| b == b'\n')? + from;
    let end = if newline > from && buf[newline - 1] == b'\r' {
        newline - 1
    } else {
        newline
    };
    Some((end, newline + 1))
}

/// Strip the single optional space that follows a field's colon.
fn field_value(raw: &[u8]) -> &[u8] {
    raw.strip_prefix(b" ").unwrap_or(raw)
}

#[derive(Default)]
struct EventFields {
    data: Vec<Vec<u8>>,
    comments: Vec<String>,
    retry: Option<u64>,
}

impl EventFields {
    fn apply(&mut self, line: &[u8]) -> Result<(), ProtocolError> {
        if let Some(comment) = line.strip_prefix(b":") {
            let text = std::str::from_utf8(field_value(comment))
                .map_err(|_| ProtocolError::Invalid("comment is not UTF-8".into()))?;
            self.comments.push(text.to_string());
            return Ok(());
        }

        let (name, value) = match line.iter().position(|&b| b == b':') {
            Some(colon) => (&line[..colon], field_value(&line[colon + 1..])),
            None => (line, &b""[..]),
        };

        match name {
            b"data" => self.data.push(value.to_vec()),
            b"retry" => {
                let millis = std::str::from_utf8(value)
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| {
                        ProtocolError::Invalid(format!(
                            "retry value {:?}",
                            String::from_utf8_lossy(value)
                        ))
                    })?;
                self.retry = Some(millis);
            }
            // `event`, `id` and unknown fields carry nothing for ssed.
            _ => {}
        }
        Ok(())
    }

    fn into_frame(self) -> Option<Frame> {
        if !self.data.is_empty() {
            return Some(Frame::Data(Bytes::from(self.data.join(&b'\n'))));
        }
        if let Some(millis) = self.retry {
            return Some(Frame::Retry(millis));
        }
        if !self.comments.is_empty() {
            return Some(Frame::Comment(self.comments.join("\n")));
        }
        None
    }
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(frame))` if a complete event was decoded, `Ok(None)` if
/// more data is needed, or `Err` on protocol error. Blank events are skipped.
///
/// # Errors
///
/// Returns an error if the pending event is too large or malformed.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    loop {
        let mut fields = EventFields::default();
        let mut pos = 0;

        let consumed = loop {
            let Some((end, next)) = next_line(buf, pos) else {
                if buf.len() > MAX_FRAME_SIZE {
                    return Err(ProtocolError::FrameTooLarge(buf.len()));
                }
                return Ok(None);
            };
            if end == pos {
                break next;
            }
            fields.apply(&buf[pos..end])?;
            pos = next;
        };

        let _ = buf.split_to(consumed);
        if let Some(frame) = fields.into_frame() {
            return Ok(Some(frame));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_single_line() {
        let encoded = encode(&Frame::data("hello")).unwrap();
        assert_eq!(&encoded[..], b"data: hello\n\n");
    }

    #[test]
    fn test_encode_splits_lines() {
        let encoded = encode(&Frame::data("a\r\nb\rc\nd")).unwrap();
        assert_eq!(&encoded[..], b"data: a\ndata: b\ndata: c\ndata: d\n\n");
    }

    #[test]
    fn test_encode_empty_payload() {
        let encoded = encode(&Frame::data(Bytes::new())).unwrap();
        assert_eq!(&encoded[..], b"data: \n\n");
        assert_eq!(decode(&encoded).unwrap(), Frame::data(Bytes::new()));
    }

    #[test]
    fn test_line_terminators_are_normalised() {
        let encoded = encode(&Frame::data("a\r")).unwrap();
        assert_eq!(&encoded[..], b"data: a\ndata: \n\n");
        assert_eq!(decode(&encoded).unwrap(), Frame::data("a\n"));

        let encoded = encode(&Frame::data("x\r\ny\rz")).unwrap();
        assert_eq!(decode(&encoded).unwrap(), Frame::data("x\ny\nz"));
    }

    #[test]
    fn test_encode_comment_and_retry() {
        assert_eq!(&encode(&Frame::heartbeat()).unwrap()[..], b": keep-alive\n\n");
        assert_eq!(&encode(&Frame::retry(2500)).unwrap()[..], b"retry: 2500\n\n");
    }

    #[test]
    fn test_multiline_payload_survives() {
        let frame = Frame::data("first\n second\n");
        let encoded = encode(&frame).unwrap();
        assert_eq!(decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_streaming_decode() {
        let mut buf = BytesMut::new();
        encode_into(&Frame::retry(1000), &mut buf).unwrap();
        encode_into(&Frame::data("one"), &mut buf).unwrap();
        encode_into(&Frame::heartbeat(), &mut buf).unwrap();
        encode_into(&Frame::data("two"), &mut buf).unwrap();

        assert_eq!(decode_from(&mut buf).unwrap(), Some(Frame::retry(1000)));
        assert_eq!(decode_from(&mut buf).unwrap(), Some(Frame::data("one")));
        assert_eq!(decode_from(&mut buf).unwrap(), Some(Frame::heartbeat()));
        assert_eq!(decode_from(&mut buf).unwrap(), Some(Frame::data("two")));
        assert_eq!(decode_from(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete() {
        let mut buf = BytesMut::from(&b"data: partial\n"[..]);
        assert_eq!(decode_from(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 14);

        buf.extend_from_slice(b"\n");
        assert_eq!(decode_from(&mut buf).unwrap(), Some(Frame::data("partial")));

        assert!(matches!(decode(b"data: x"), Err(ProtocolError::Incomplete)));
    }

    #[test]
    fn test_decode_crlf_and_foreign_fields() {
        let mut buf = BytesMut::from(&b"\r\nid: 7\r\nevent: note\r\ndata:tight\r\n\r\n"[..]);
        assert_eq!(decode_from(&mut buf).unwrap(), Some(Frame::data("tight")));
    }

    #[test]
    fn test_decode_invalid_retry() {
        assert!(matches!(
            decode(b"retry: soon\n\n"),
            Err(ProtocolError::Invalid(_))
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let frame = Frame::data(vec![b'x'; MAX_FRAME_SIZE]);
        assert!(matches!(encode(&frame), Err(ProtocolError::FrameTooLarge(_))));

        let mut buf = BytesMut::from(&vec![b'x'; MAX_FRAME_SIZE + 1][..]);
        assert!(matches!(
            decode_from(&mut buf),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }
}
