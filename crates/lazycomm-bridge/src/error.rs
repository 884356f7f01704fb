//! Error taxonomy for LZY frames.

use std::fmt;
use std::io;

/// The part of a frame an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Headers,
    Query,
    Body,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Segment::Headers => "headers",
            Segment::Query => "query",
            Segment::Body => "body",
        };
        f.write_str(name)
    }
}

/// Errors produced while encoding, decoding or exchanging a frame.
///
/// None of these are recoverable for the current exchange: the stream
/// position is unknown afterwards, so the worker aborts and the parent
/// decides whether to relaunch.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The metadata line is missing, unterminated, or malformed.
    #[error("malformed metadata line: {0}")]
    Framing(String),

    /// The stream ended before a declared segment was complete.
    #[error("stream ended inside {segment} segment: expected {expected} bytes, got {actual}")]
    TruncatedStream {
        segment: Segment,
        expected: usize,
        actual: usize,
    },

    /// A JSON segment is not an object of string values.
    #[error("invalid {segment} payload: {reason}")]
    Payload { segment: Segment, reason: String },

    /// A reserved request header is absent.
    #[error("request is missing required header '{0}'")]
    MissingField(&'static str),

    /// A mapping could not be serialized.
    #[error("failed to encode {segment}: {reason}")]
    Encoding { segment: Segment, reason: String },

    /// A response was emitted zero times or more than once.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FrameError {
    pub fn framing(message: impl Into<String>) -> Self {
        Self::Framing(message.into())
    }

    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }

    pub(crate) fn payload(segment: Segment, err: serde_json::Error) -> Self {
        Self::Payload {
            segment,
            reason: err.to_string(),
        }
    }

    pub(crate) fn encoding(segment: Segment, err: serde_json::Error) -> Self {
        Self::Encoding {
            segment,
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_stream_message_names_segment() {
        let err = FrameError::TruncatedStream {
            segment: Segment::Query,
            expected: 13,
            actual: 9,
        };
        insta::assert_snapshot!(
            err.to_string(),
            @"stream ended inside query segment: expected 13 bytes, got 9"
        );
    }

    #[test]
    fn missing_field_message() {
        let err = FrameError::MissingField("x-method");
        insta::assert_snapshot!(err.to_string(), @"request is missing required header 'x-method'");
    }
}
