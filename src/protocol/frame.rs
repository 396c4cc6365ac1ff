//! Frame: one kind byte followed by the payload.
//!
//! There is no length prefix; the transport delivers each frame as one
//! complete message. Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use recordwire::protocol::{frame, unframe, MessageKind};
//!
//! let bytes = frame(MessageKind::GetRecord.as_u8(), b"1");
//! assert_eq!(&bytes[..], &[1, b'1']);
//!
//! let parsed = unframe(&bytes).unwrap();
//! assert_eq!(parsed.kind(), 1);
//! assert_eq!(parsed.payload(), b"1");
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::kind::{MessageKind, ERROR_KIND};
use crate::codec::TextCodec;
use crate::error::{Result, WireError};

/// Size of the frame prefix (the kind byte).
pub const KIND_SIZE: usize = 1;

/// Generic message used when a request fails for an unexpected reason.
pub const GENERIC_FAILURE: &str = "request failed";

/// A parsed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Kind byte.
    pub kind: u8,
    /// Payload bytes (zero-copy via `bytes::Bytes`). May be empty.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(kind: u8, payload: Bytes) -> Self {
        Self { kind, payload }
    }

    /// Get the kind byte.
    #[inline]
    pub fn kind(&self) -> u8 {
        self.kind
    }

    /// Get the kind as a known message kind, if it is one.
    #[inline]
    pub fn message_kind(&self) -> Option<MessageKind> {
        MessageKind::from_u8(self.kind)
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Check if this is an error envelope.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.kind == ERROR_KIND
    }

    /// Encode back into wire bytes.
    pub fn encode(&self) -> Bytes {
        frame(self.kind, &self.payload)
    }
}

/// Build a frame: `kind` followed by `payload`.
pub fn frame(kind: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(KIND_SIZE + payload.len());
    buf.put_u8(kind);
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Parse a frame.
///
/// The payload is a zero-copy slice of `bytes`.
///
/// # Errors
///
/// Returns [`WireError::MalformedFrame`] if `bytes` is empty.
pub fn unframe(bytes: &Bytes) -> Result<Frame> {
    let Some(&kind) = bytes.first() else {
        return Err(WireError::MalformedFrame);
    };
    Ok(Frame {
        kind,
        payload: bytes.slice(KIND_SIZE..),
    })
}

/// Body of an error frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Human-readable failure description.
    pub error: String,
}

impl ErrorEnvelope {
    /// Create an envelope.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }

    /// Decode an error frame payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        TextCodec::decode(payload)
    }
}

/// Build an error frame carrying `{"error": message}` as JSON text.
///
/// Never touches the schema codec, so it can always be decoded by the peer.
pub fn error_frame(message: &str) -> Bytes {
    match TextCodec::encode(&ErrorEnvelope::new(message)) {
        Ok(body) => frame(ERROR_KIND, &body),
        // A struct with one string field always serializes; keep a literal
        // body anyway so the peer still gets a well-formed envelope.
        Err(_) => frame(ERROR_KIND, br#"{"error":"request failed"}"#),
    }
}
