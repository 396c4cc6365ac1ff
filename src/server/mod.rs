//! Receiver side: handler registry and serve loops.
//!
//! - [`HandlerRegistry`] - maps message kinds to typed handlers
//! - [`ServerBuilder`] / [`Server`] - bind an endpoint and accept connections
//! - [`serve_connection`] - serve a single already-connected stream

mod handlers;
mod listener;
mod registry;

pub use handlers::register_record_handlers;
pub use listener::{serve_connection, serve_connection_with, ServeOptions, Server, ServerBuilder};
pub use registry::{FromPayload, Handler, HandlerRegistry, TypedHandler};
