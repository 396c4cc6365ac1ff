//! Transport module - moving frames over byte streams.
//!
//! Provides:
//! - Length-prefixed message delimiting ([`MessageBuffer`], [`MessageReader`])
//! - A dedicated writer task with batching and backpressure ([`WriterHandle`])
//! - TCP and Unix Domain Socket endpoints ([`Endpoint`], [`Listener`])

mod message;
mod socket;
mod writer;

pub use message::{
    encode_length, MessageBuffer, MessageReader, DEFAULT_MAX_MESSAGE_SIZE, LENGTH_PREFIX_SIZE,
};
pub use socket::{BoxedStream, Connector, Endpoint, Listener, Stream, UNIX_PREFIX};
pub use writer::{
    spawn_writer_task, OutboundMessage, WriterConfig, WriterHandle, DEFAULT_BACKPRESSURE_TIMEOUT,
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_PENDING_MESSAGES,
};
