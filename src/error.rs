//! Error types for recordwire.

use thiserror::Error;

use crate::protocol::MessageKind;

/// Main error type for all recordwire operations.
#[derive(Debug, Error)]
pub enum WireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Outbound frame attempted while the connection is not open.
    #[error("Not connected")]
    NotConnected,

    /// Inbound message too short to carry a kind byte.
    #[error("Malformed frame: empty message")]
    MalformedFrame,

    /// Value could not be turned into bytes, not even as text.
    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    /// Bytes could not be decoded by the schema nor parsed as text.
    #[error("Deserialization failure: {0}")]
    DeserializationFailure(String),

    /// No handler registered for the given kind byte.
    #[error("Unknown message kind: {0}")]
    UnknownKind(u8),

    /// The record store has no record with this id.
    #[error("record {0} not found")]
    RecordNotFound(String),

    /// A handler rejected the request.
    #[error("{0}")]
    Handler(String),

    /// The peer answered with an error frame.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Schema set is invalid or could not be loaded.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A spawned task panicked or was cancelled.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// Connection closed while a request was outstanding.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No response arrived within the configured request timeout.
    #[error("Request timed out waiting for {0:?}")]
    RequestTimeout(MessageKind),

    /// Backpressure timeout - write buffer full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// Transport message exceeds the configured maximum.
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Announced message size.
        size: u32,
        /// Configured maximum.
        max: u32,
    },
}

impl WireError {
    /// Whether this error is a handled request failure whose message should
    /// reach the peer verbatim.
    ///
    /// Anything else is reported to the peer as a generic failure.
    pub fn is_handler_failure(&self) -> bool {
        matches!(self, WireError::RecordNotFound(_) | WireError::Handler(_))
    }
}

/// Result type alias using WireError.
pub type Result<T> = std::result::Result<T, WireError>;
