//! LZY frame codec.
//!
//! A frame is one ASCII metadata line followed by the segments it declares:
//!
//! ```text
//! request:  "<headers_len> <query_len> <body_len>\n" headers-json query-json body
//! response: "<status> <headers_len> <body_len>\n"    headers-json body
//! ```
//!
//! Segments are read by length only. Headers and query JSON may contain
//! newlines or spaces, and the body is opaque.
//!
//! Two entry points share the same parsing:
//! - [`read_frame`] / [`write_frame`]: blocking std I/O, used by workers
//! - [`FrameCodec`]: tokio-util `Decoder`/`Encoder`, used by the parent

use std::io::{BufRead, Read, Write};
use std::marker::PhantomData;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Segment};
use crate::message::{Fields, Request, Response, Role};

/// Upper bound for a metadata line, terminator included.
///
/// Three 64-bit decimal numbers and two separators fit with room to spare.
pub const MAX_METADATA_LEN: usize = 128;

/// Segment lengths (and status) declared by a metadata line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Request {
        headers_len: usize,
        query_len: usize,
        body_len: usize,
    },
    Response {
        status: u16,
        headers_len: usize,
        body_len: usize,
    },
}

impl Layout {
    /// Parse a metadata line (with or without its `\n`) for the given role.
    pub fn parse(role: Role, line: &[u8]) -> Result<Self, FrameError> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let text = std::str::from_utf8(line)
            .map_err(|_| FrameError::framing("metadata line is not valid ASCII"))?;

        let fields: Vec<&str> = text.split_ascii_whitespace().collect();
        let [first, second, third] = fields.as_slice() else {
            return Err(FrameError::framing(format!(
                "expected 3 fields in {role} metadata, got {}",
                fields.len()
            )));
        };

        let layout = match role {
            Role::Request => Layout::Request {
                headers_len: parse_field("headers length", first)?,
                query_len: parse_field("query length", second)?,
                body_len: parse_field("body length", third)?,
            },
            Role::Response => Layout::Response {
                status: parse_field("status code", first)?,
                headers_len: parse_field("headers length", second)?,
                body_len: parse_field("body length", third)?,
            },
        };

        layout
            .segments()
            .iter()
            .try_fold(0usize, |acc, (_, len)| acc.checked_add(*len))
            .ok_or_else(|| FrameError::framing("declared segment lengths overflow"))?;

        Ok(layout)
    }

    /// Declared segments in wire order.
    pub fn segments(&self) -> Vec<(Segment, usize)> {
        match *self {
            Layout::Request {
                headers_len,
                query_len,
                body_len,
            } => vec![
                (Segment::Headers, headers_len),
                (Segment::Query, query_len),
                (Segment::Body, body_len),
            ],
            Layout::Response {
                headers_len,
                body_len,
                ..
            } => vec![(Segment::Headers, headers_len), (Segment::Body, body_len)],
        }
    }

    /// Total number of bytes following the metadata line.
    pub fn payload_len(&self) -> usize {
        self.segments().iter().map(|(_, len)| len).sum()
    }

    /// Error describing a payload cut short after `available` bytes.
    fn truncation(&self, available: usize) -> FrameError {
        let mut remaining = available;
        let segments = self.segments();
        for (segment, len) in &segments {
            if remaining < *len {
                return FrameError::TruncatedStream {
                    segment: *segment,
                    expected: *len,
                    actual: remaining,
                };
            }
            remaining -= len;
        }
        let (segment, len) = segments.last().copied().unwrap_or((Segment::Body, 0));
        FrameError::TruncatedStream {
            segment,
            expected: len,
            actual: len,
        }
    }
}

/// Parse a plain decimal field. `FromStr` would also take a leading `+`.
fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, FrameError> {
    let invalid = || FrameError::framing(format!("invalid {name} '{value}'"));
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    value.parse().map_err(|_| invalid())
}

/// A message that can travel as an LZY frame.
pub trait Frame: Sized {
    const ROLE: Role;

    /// Append the encoded frame to `dst`. Nothing is appended on error.
    fn encode_into(&self, dst: &mut BytesMut) -> Result<(), FrameError>;

    /// Build the message from its layout and exactly `layout.payload_len()` bytes.
    fn from_payload(layout: Layout, payload: Bytes) -> Result<Self, FrameError>;
}

impl Frame for Request {
    const ROLE: Role = Role::Request;

    fn encode_into(&self, dst: &mut BytesMut) -> Result<(), FrameError> {
        let headers = fields_to_json(Segment::Headers, &self.headers)?;
        let query = fields_to_json(Segment::Query, &self.query)?;

        let line = format!("{} {} {}\n", headers.len(), query.len(), self.body.len());
        dst.reserve(line.len() + headers.len() + query.len() + self.body.len());
        dst.put_slice(line.as_bytes());
        dst.put_slice(&headers);
        dst.put_slice(&query);
        dst.put_slice(&self.body);
        Ok(())
    }

    fn from_payload(layout: Layout, mut payload: Bytes) -> Result<Self, FrameError> {
        let Layout::Request {
            headers_len,
            query_len,
            ..
        } = layout
        else {
            return Err(FrameError::framing("expected request metadata"));
        };
        check_payload_len(&layout, &payload)?;

        let headers = fields_from_json(Segment::Headers, &payload.split_to(headers_len))?;
        let query = fields_from_json(Segment::Query, &payload.split_to(query_len))?;
        Ok(Request {
            headers,
            query,
            body: payload,
        })
    }
}

impl Frame for Response {
    const ROLE: Role = Role::Response;

    fn encode_into(&self, dst: &mut BytesMut) -> Result<(), FrameError> {
        let headers = fields_to_json(Segment::Headers, &self.headers)?;

        let line = format!("{} {} {}\n", self.status, headers.len(), self.body.len());
        dst.reserve(line.len() + headers.len() + self.body.len());
        dst.put_slice(line.as_bytes());
        dst.put_slice(&headers);
        dst.put_slice(&self.body);
        Ok(())
    }

    fn from_payload(layout: Layout, mut payload: Bytes) -> Result<Self, FrameError> {
        let Layout::Response {
            status,
            headers_len,
            ..
        } = layout
        else {
            return Err(FrameError::framing("expected response metadata"));
        };
        check_payload_len(&layout, &payload)?;

        let headers = fields_from_json(Segment::Headers, &payload.split_to(headers_len))?;
        Ok(Response {
            status,
            headers,
            body: payload,
        })
    }
}

fn check_payload_len(layout: &Layout, payload: &Bytes) -> Result<(), FrameError> {
    let expected = layout.payload_len();
    if payload.len() < expected {
        return Err(layout.truncation(payload.len()));
    }
    if payload.len() > expected {
        return Err(FrameError::framing(format!(
            "payload of {} bytes exceeds declared {expected}",
            payload.len()
        )));
    }
    Ok(())
}

fn fields_to_json(segment: Segment, fields: &Fields) -> Result<Vec<u8>, FrameError> {
    serde_json::to_vec(fields).map_err(|e| FrameError::encoding(segment, e))
}

fn fields_from_json(segment: Segment, bytes: &[u8]) -> Result<Fields, FrameError> {
    serde_json::from_slice(bytes).map_err(|e| FrameError::payload(segment, e))
}

/// Encode a message into a standalone buffer.
pub fn encode<F: Frame>(frame: &F) -> Result<Bytes, FrameError> {
    let mut buf = BytesMut::new();
    frame.encode_into(&mut buf)?;
    Ok(buf.freeze())
}

/// Read exactly one frame from a blocking stream.
///
/// Consumes the metadata line and the declared payload, nothing more.
pub fn read_frame<F: Frame, R: BufRead>(reader: &mut R) -> Result<F, FrameError> {
    let mut line = Vec::with_capacity(32);
    let n = reader
        .by_ref()
        .take(MAX_METADATA_LEN as u64)
        .read_until(b'\n', &mut line)?;
    if n == 0 {
        return Err(FrameError::framing("stream closed before metadata line"));
    }
    if line.last() != Some(&b'\n') {
        return Err(unterminated_line(line.len()));
    }

    let layout = Layout::parse(F::ROLE, &line)?;
    let expected = layout.payload_len();

    // Grows as bytes arrive, so a bogus length cannot force a huge allocation.
    let mut payload = Vec::new();
    reader
        .by_ref()
        .take(expected as u64)
        .read_to_end(&mut payload)?;
    if payload.len() < expected {
        return Err(layout.truncation(payload.len()));
    }

    tracing::trace!(role = %F::ROLE, payload_bytes = expected, "Decoded frame");
    F::from_payload(layout, Bytes::from(payload))
}

/// Encode and write one frame, then flush.
pub fn write_frame<F: Frame, W: Write + ?Sized>(
    frame: &F,
    writer: &mut W,
) -> Result<(), FrameError> {
    let buf = encode(frame)?;
    writer.write_all(&buf)?;
    writer.flush()?;
    tracing::trace!(role = %F::ROLE, frame_bytes = buf.len(), "Wrote frame");
    Ok(())
}

fn unterminated_line(len: usize) -> FrameError {
    if len >= MAX_METADATA_LEN {
        FrameError::framing(format!(
            "metadata line exceeds {MAX_METADATA_LEN} bytes"
        ))
    } else {
        FrameError::framing("stream ended before end of metadata line")
    }
}

/// Framed codec for LZY messages over any AsyncRead/AsyncWrite.
///
/// Decoding waits for a complete frame before yielding it. An optional
/// payload limit rejects oversized frames as soon as their metadata line
/// arrives.
pub struct FrameCodec<F> {
    max_payload: Option<usize>,
    _phantom: PhantomData<F>,
}

impl<F> Default for FrameCodec<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> FrameCodec<F> {
    pub fn new() -> Self {
        Self {
            max_payload: None,
            _phantom: PhantomData,
        }
    }

    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = Some(max_payload);
        self
    }
}

impl<F: Frame> Decoder for FrameCodec<F> {
    type Item = F;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(newline) = src.iter().position(|b| *b == b'\n') else {
            if src.len() >= MAX_METADATA_LEN {
                return Err(unterminated_line(src.len()));
            }
            return Ok(None);
        };
        let line_len = newline + 1;
        if line_len > MAX_METADATA_LEN {
            return Err(unterminated_line(line_len));
        }

        let layout = Layout::parse(F::ROLE, &src[..line_len])?;
        let payload_len = layout.payload_len();
        if let Some(max) = self.max_payload
            && payload_len > max
        {
            return Err(FrameError::framing(format!(
                "declared payload of {payload_len} bytes exceeds limit of {max}"
            )));
        }

        let total = line_len
            .checked_add(payload_len)
            .ok_or_else(|| FrameError::framing("declared segment lengths overflow"))?;
        if src.len() < total {
            return Ok(None);
        }

        let _ = src.split_to(line_len);
        let payload = src.split_to(payload_len).freeze();
        tracing::trace!(role = %F::ROLE, payload_bytes = payload_len, "Decoded frame");
        F::from_payload(layout, payload).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(incomplete_frame(F::ROLE, src)),
        }
    }
}

/// Error for a buffer holding the start of a frame but not all of it.
fn incomplete_frame(role: Role, src: &[u8]) -> FrameError {
    let Some(newline) = src.iter().position(|b| *b == b'\n') else {
        return unterminated_line(src.len());
    };
    match Layout::parse(role, &src[..=newline]) {
        Ok(layout) => layout.truncation(src.len() - newline - 1),
        Err(e) => e,
    }
}

impl<F: Frame> Encoder<F> for FrameCodec<F> {
    type Error = FrameError;

    fn encode(&mut self, item: F, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        item.encode_into(dst)?;
        tracing::trace!(role = %F::ROLE, frame_bytes = dst.len() - start, "Encoding frame");
        Ok(())
    }
}
