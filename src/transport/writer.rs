//! Dedicated writer task for outbound messages.
//!
//! Every component that sends on a connection holds a cloned
//! [`WriterHandle`]; one task owns the write half, so messages from
//! concurrent senders are never interleaved and can be batched into a
//! single vectored write.
//!
//! ```text
//! Caller 1 ─┐
//! Caller 2 ─┼─► mpsc::Sender<OutboundMessage> ─► Writer Task ─► Socket
//! Caller N ─┘
//! ```
//!
//! Dropping the last handle shuts the write half down, which the peer sees
//! as end of stream.

use std::io::IoSlice;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use super::message::{encode_length, LENGTH_PREFIX_SIZE};
use crate::error::{Result, WireError};

/// Default maximum pending messages before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_MESSAGES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum messages to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A framed message ready to be written.
#[derive(Debug)]
pub struct OutboundMessage {
    /// Length prefix of `body`.
    pub prefix: [u8; LENGTH_PREFIX_SIZE],
    /// Encoded frame.
    pub body: Bytes,
    /// Pending slot, released once the message is written or dropped.
    slot: Option<OwnedSemaphorePermit>,
}

impl OutboundMessage {
    /// Wrap an encoded frame.
    #[inline]
    pub fn new(body: Bytes) -> Self {
        Self {
            prefix: encode_length(body.len()),
            body,
            slot: None,
        }
    }

    fn with_slot(body: Bytes, slot: OwnedSemaphorePermit) -> Self {
        Self {
            slot: Some(slot),
            ..Self::new(body)
        }
    }

    /// Bytes this message occupies on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.body.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending messages before backpressure kicks in.
    pub max_pending_messages: usize,
    /// Channel capacity for the message queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_messages: DEFAULT_MAX_PENDING_MESSAGES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Handle for sending messages to the writer task.
///
/// Every queued message holds one of `max_pending` slots until the writer
/// task has written it, so a slow peer eventually blocks senders.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundMessage>,
    slots: Arc<Semaphore>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    fn new(tx: mpsc::Sender<OutboundMessage>, max_pending: usize, timeout: Duration) -> Self {
        let max_pending = max_pending.max(1);
        Self {
            tx,
            slots: Arc::new(Semaphore::new(max_pending)),
            max_pending,
            timeout,
        }
    }

    /// Queue an encoded frame.
    ///
    /// Waits for a free slot and for room in the channel, up to the
    /// configured timeout.
    ///
    /// # Errors
    ///
    /// [`WireError::ConnectionClosed`] once the writer task has exited,
    /// [`WireError::BackpressureTimeout`] if the queue stays full.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        if self.tx.is_closed() {
            return Err(WireError::ConnectionClosed);
        }

        let queued = async {
            let slot = self
                .slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| WireError::ConnectionClosed)?;
            self.tx
                .send(OutboundMessage::with_slot(frame, slot))
                .await
                .map_err(|_| WireError::ConnectionClosed)
        };

        tokio::time::timeout(self.timeout, queued)
            .await
            .map_err(|_| WireError::BackpressureTimeout)?
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.slots.available_permits() == 0
    }

    /// Get current pending message count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.max_pending - self.slots.available_permits()
    }

    /// Whether the writer task is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending messages.
///
/// The returned `JoinHandle` resolves once every handle has been dropped and
/// the write half has been shut down, or on the first write error.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let handle = WriterHandle::new(
        tx,
        config.max_pending_messages,
        config.backpressure_timeout,
    );

    let task = tokio::spawn(writer_loop(rx, writer));

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundMessage>,
    mut writer: W,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(m) => m,
            None => {
                // All handles dropped: signal end of stream to the peer.
                if let Err(e) = writer.shutdown().await {
                    tracing::debug!("Write half shutdown failed: {}", e);
                }
                return Ok(());
            }
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(message) => batch.push(message),
                Err(_) => break,
            }
        }

        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::warn!(messages = batch.len(), "Writer task stopped: {}", e);
            return Err(e);
        }
        // Frees the slots of the written messages.
        drop(batch);
    }
}

/// Write a batch of messages with scatter/gather I/O.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundMessage]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|m| m.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(WireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// IoSlices covering everything after the first `skip_bytes` of the batch.
fn build_remaining_slices(batch: &[OutboundMessage], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for message in batch {
        let prefix_end = offset + LENGTH_PREFIX_SIZE;
        if skip_bytes < prefix_end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&message.prefix[start..]));
        }
        offset = prefix_end;

        if !message.body.is_empty() {
            let body_end = offset + message.body.len();
            if skip_bytes < body_end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&message.body[start..]));
            }
            offset = body_end;
        }
    }

    slices
}
