//! Initiator side: connection lifecycle and request dispatch.
//!
//! - [`Connection`] - status state machine and request API
//! - [`ConnectionBuilder`] - endpoint, timeouts, writer and schema settings
//! - [`ConnectionStatus`] - lifecycle states broadcast to observers

mod connection;
mod dispatcher;
mod status;

pub use connection::{
    Connection, ConnectionBuilder, DEFAULT_CLOSE_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
};
pub use status::{ConnectionStatus, ObserverId, StatusObserver};
