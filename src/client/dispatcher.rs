//! Pending-request table of the initiator.
//!
//! Requests are correlated by message kind alone: there is one slot per kind,
//! and a new request of a kind replaces the continuation already waiting in
//! that slot. The replaced continuation is parked until the connection closes,
//! so its caller never sees a response that belongs to the newer request.
//!
//! The table is owned by the connection's event loop and is never shared.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::{Result, WireError};
use crate::protocol::{
    unframe, ErrorEnvelope, MessageKind, GENERIC_FAILURE, UNKNOWN_KIND_SENTINEL,
};

/// Single-shot continuation of one request. Resolved with the raw response
/// payload; decoding happens on the caller's task.
pub(crate) type Continuation = oneshot::Sender<Result<Bytes>>;

struct Pending {
    generation: u64,
    tx: Continuation,
}

/// Outstanding requests, one per kind.
#[derive(Default)]
pub(crate) struct PendingTable {
    slots: HashMap<u8, Pending>,
    /// Registration order of live slots, oldest first.
    order: VecDeque<(u8, u64)>,
    /// Continuations replaced by a newer request of the same kind.
    displaced: Vec<Continuation>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register `tx` under `kind`, replacing any continuation already there.
    ///
    /// Returns `true` if a continuation was replaced.
    pub(crate) fn register(
        &mut self,
        kind: MessageKind,
        generation: u64,
        tx: Continuation,
    ) -> bool {
        let byte = kind.as_u8();
        let replaced = match self.slots.insert(byte, Pending { generation, tx }) {
            Some(old) => {
                tracing::warn!(
                    %kind,
                    "Outstanding request replaced; the earlier caller will not be answered"
                );
                self.order.retain(|&(k, g)| !(k == byte && g == old.generation));
                self.displaced.push(old.tx);
                true
            }
            None => false,
        };
        self.order.push_back((byte, generation));
        replaced
    }

    /// Resolve the continuation registered under `kind`.
    pub(crate) fn resolve(&mut self, kind: u8, payload: Bytes) -> bool {
        match self.take(kind) {
            Some(tx) => {
                // A caller that gave up has dropped its receiver.
                let _ = tx.send(Ok(payload));
                true
            }
            None => false,
        }
    }

    /// Reject the oldest outstanding continuation.
    ///
    /// Returns the kind that was rejected.
    pub(crate) fn reject_oldest(&mut self, error: impl FnOnce(u8) -> WireError) -> Option<u8> {
        let (kind, _) = self.order.front().copied()?;
        let tx = self.take(kind)?;
        let _ = tx.send(Err(error(kind)));
        Some(kind)
    }

    /// Forget the request `generation` of `kind` after its caller timed out.
    ///
    /// A newer request of the same kind is left untouched.
    pub(crate) fn expire(&mut self, kind: MessageKind, generation: u64) -> bool {
        let byte = kind.as_u8();
        match self.slots.get(&byte) {
            Some(pending) if pending.generation == generation => {
                self.take(byte);
                tracing::debug!(%kind, "Expired request removed");
                true
            }
            _ => false,
        }
    }

    /// Fail every continuation, displaced ones included.
    pub(crate) fn fail_all(&mut self) -> usize {
        let mut failed = 0;
        for (_, pending) in self.slots.drain() {
            let _ = pending.tx.send(Err(WireError::ConnectionClosed));
            failed += 1;
        }
        for tx in self.displaced.drain(..) {
            let _ = tx.send(Err(WireError::ConnectionClosed));
            failed += 1;
        }
        self.order.clear();
        failed
    }

    /// Number of live slots.
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    fn take(&mut self, kind: u8) -> Option<Continuation> {
        let pending = self.slots.remove(&kind)?;
        self.order
            .retain(|&(k, g)| !(k == kind && g == pending.generation));
        Some(pending.tx)
    }
}

/// Route one inbound message to the pending table.
///
/// Nothing here is fatal to the connection: frames that match no request are
/// logged and dropped.
pub(crate) fn handle_inbound(table: &mut PendingTable, message: Bytes) {
    if message[..] == UNKNOWN_KIND_SENTINEL {
        match table.reject_oldest(WireError::UnknownKind) {
            Some(kind) => tracing::warn!(kind, "Peer has no handler for request kind"),
            None => tracing::warn!("Unknown-kind response with no outstanding request, dropping"),
        }
        return;
    }

    let frame = match unframe(&message) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("Dropping inbound message: {}", e);
            return;
        }
    };

    if frame.is_error() {
        let message = match ErrorEnvelope::decode(frame.payload()) {
            Ok(envelope) => envelope.error,
            Err(e) => {
                tracing::debug!("Unreadable error envelope: {}", e);
                GENERIC_FAILURE.to_string()
            }
        };
        if table.reject_oldest(|_| WireError::Remote(message)).is_none() {
            tracing::warn!("Error frame with no outstanding request, dropping");
        }
        return;
    }

    let kind = frame.kind();
    if !table.resolve(kind, frame.payload) {
        tracing::warn!(kind, "No pending request for inbound frame, dropping");
    }
}
