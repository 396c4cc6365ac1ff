//! Connection status and its observers.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Lifecycle state of a [`Connection`](super::Connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Never connected.
    Disconnected,
    /// Transport is being opened.
    Connecting,
    /// Ready to send.
    Open,
    /// Shutdown requested or peer gone, draining.
    Closing,
    /// Transport closed. A fresh `connect()` is allowed.
    Closed,
}

impl ConnectionStatus {
    /// Lower-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Open => "open",
            ConnectionStatus::Closing => "closing",
            ConnectionStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback invoked with every new status.
pub type StatusObserver = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Token returned by [`Connection::observe`](super::Connection::observe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct Inner {
    status: ConnectionStatus,
    observers: Vec<(ObserverId, StatusObserver)>,
    next_id: u64,
}

/// Current status plus the observers to notify on change.
pub(crate) struct StatusBoard {
    inner: Mutex<Inner>,
}

impl StatusBoard {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                status: ConnectionStatus::Disconnected,
                observers: Vec::new(),
                next_id: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Observers run outside the lock, so poisoning only means a panic in
        // this module; the state itself is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn get(&self) -> ConnectionStatus {
        self.lock().status
    }

    pub(crate) fn observe(&self, observer: StatusObserver) -> ObserverId {
        let mut inner = self.lock();
        let id = ObserverId(inner.next_id);
        inner.next_id += 1;
        inner.observers.push((id, observer));
        id
    }

    pub(crate) fn remove(&self, id: ObserverId) -> bool {
        let mut inner = self.lock();
        let before = inner.observers.len();
        inner.observers.retain(|(existing, _)| *existing != id);
        inner.observers.len() != before
    }

    /// Move to `status` and notify observers in registration order.
    ///
    /// Setting the current status again is a no-op.
    pub(crate) fn set(&self, status: ConnectionStatus) {
        self.transition_if(status, |current| current != status);
    }

    /// Move to `to` only if the current status is one of `from`.
    ///
    /// The check and the change happen under one lock, so a concurrent
    /// `set` cannot slip in between. Returns whether the status changed.
    pub(crate) fn transition(&self, from: &[ConnectionStatus], to: ConnectionStatus) -> bool {
        self.transition_if(to, |current| current != to && from.contains(&current))
    }

    fn transition_if<P>(&self, status: ConnectionStatus, allowed: P) -> bool
    where
        P: FnOnce(ConnectionStatus) -> bool,
    {
        let observers = {
            let mut inner = self.lock();
            if !allowed(inner.status) {
                return false;
            }
            inner.status = status;
            inner
                .observers
                .iter()
                .map(|(_, observer)| observer.clone())
                .collect::<Vec<_>>()
        };

        tracing::debug!(%status, "Connection status changed");
        for observer in observers {
            observer(status);
        }
        true
    }
}
