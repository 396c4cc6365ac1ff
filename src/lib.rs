//! # recordwire
//!
//! Compact binary record protocol over persistent sockets.
//!
//! Every message is a [`Frame`](protocol::Frame): one kind byte followed by a
//! payload produced by the [`Codec`](codec::Codec), which prefers a
//! schema-driven binary encoding and falls back to JSON text.
//!
//! ## Architecture
//!
//! - **Initiator** ([`Connection`]): status state machine plus a request
//!   dispatcher holding one pending continuation per message kind
//! - **Receiver** ([`Server`]): handler registry mapping each kind to a typed
//!   handler backed by a [`RecordService`](store::RecordService)
//!
//! ## Example
//!
//! ```ignore
//! use recordwire::{Connection, Endpoint};
//!
//! #[tokio::main]
//! async fn main() -> recordwire::Result<()> {
//!     let connection = Connection::new(Endpoint::parse("127.0.0.1:7070"));
//!     connection.connect().await?;
//!
//!     let record = connection.get_record("1").await?;
//!     println!("{}: {}", record.id, record.name);
//!
//!     connection.disconnect().await
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod model;
pub mod protocol;
pub mod server;
pub mod store;
pub mod transport;

pub use client::{Connection, ConnectionBuilder, ConnectionStatus};
pub use error::{Result, WireError};
pub use server::{HandlerRegistry, Server, ServerBuilder};
pub use transport::Endpoint;

/// Boxed future returned by the object-safe async traits of this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
