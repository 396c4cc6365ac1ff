//! Message delimiting over byte streams.
//!
//! Frames carry no length, so stream transports wrap each one in a 4-byte
//! big-endian length prefix. [`MessageBuffer`] accumulates partial reads and
//! yields complete messages; [`MessageReader`] drives it from an
//! `AsyncRead`.
//!
//! ```text
//! +----------------+----------------------+
//! | length (u32be) | message (one frame)  |
//! +----------------+----------------------+
//! ```

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, WireError};

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum message size (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Read buffer size used by [`MessageReader`].
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Encode a length prefix.
#[inline]
pub fn encode_length(len: usize) -> [u8; LENGTH_PREFIX_SIZE] {
    (len as u32).to_be_bytes()
}

/// Parsing state.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Need the 4-byte prefix.
    WaitingForLength,
    /// Prefix parsed, need `remaining` body bytes.
    WaitingForBody { remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete messages.
pub struct MessageBuffer {
    buffer: BytesMut,
    state: State,
    max_message_size: u32,
}

impl MessageBuffer {
    /// Create a buffer with the default size limit.
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a buffer with a custom size limit.
    pub fn with_max_message_size(max_message_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(READ_CHUNK_SIZE),
            state: State::WaitingForLength,
            max_message_size,
        }
    }

    /// Push data into the buffer and extract all complete messages.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::MessageTooLarge`] if a prefix announces more than
    /// the configured maximum. The stream cannot be resynchronised after that.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut messages = Vec::new();
        while let Some(message) = self.try_extract_one()? {
            messages.push(message);
        }
        Ok(messages)
    }

    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::WaitingForLength => {
                    if self.buffer.len() < LENGTH_PREFIX_SIZE {
                        return Ok(None);
                    }
                    let prefix = self.buffer.split_to(LENGTH_PREFIX_SIZE);
                    let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);

                    if len > self.max_message_size {
                        return Err(WireError::MessageTooLarge {
                            size: len,
                            max: self.max_message_size,
                        });
                    }
                    // Zero-length messages are delivered; the frame layer
                    // rejects them as malformed.
                    self.state = State::WaitingForBody { remaining: len };
                }
                State::WaitingForBody { remaining } => {
                    let remaining = remaining as usize;
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }
                    self.state = State::WaitingForLength;
                    return Ok(Some(self.buffer.split_to(remaining).freeze()));
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads whole messages from a stream.
pub struct MessageReader<R> {
    reader: R,
    buffer: MessageBuffer,
    ready: VecDeque<Bytes>,
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    /// Wrap a reader.
    pub fn new(reader: R) -> Self {
        Self::with_max_message_size(reader, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Wrap a reader with a custom size limit.
    pub fn with_max_message_size(reader: R, max_message_size: u32) -> Self {
        Self {
            reader,
            buffer: MessageBuffer::with_max_message_size(max_message_size),
            ready: VecDeque::new(),
            chunk: vec![0u8; READ_CHUNK_SIZE],
        }
    }

    /// Next complete message, or `None` once the peer closed the stream.
    ///
    /// Cancel safe: a dropped call loses no data, so it can sit in a
    /// `tokio::select!` loop.
    pub async fn next_message(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(message) = self.ready.pop_front() {
                return Ok(Some(message));
            }

            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                if !self.buffer.is_empty() {
                    tracing::debug!(
                        buffered = self.buffer.len(),
                        "Stream closed mid-message, discarding partial data"
                    );
                }
                return Ok(None);
            }
            self.ready.extend(self.buffer.push(&self.chunk[..n])?);
        }
    }
}
