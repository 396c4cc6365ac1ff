//! Protocol module - message kinds and framing.
//!
//! Every message on the socket is a frame: `byte[0] = kind`,
//! `byte[1..] = payload`. Defined kinds:
//!
//! - `1` single record request/response
//! - `2` list-all request/response (empty request payload)
//! - `255` error envelope, always `{"error": message}` as JSON text
//!
//! A receiver with no handler for a kind answers with the two-byte
//! sentinel `[0, 0]`.

mod frame;
mod kind;

pub use frame::{
    error_frame, frame, unframe, ErrorEnvelope, Frame, GENERIC_FAILURE, KIND_SIZE,
};
pub use kind::{MessageKind, ERROR_KIND, UNKNOWN_KIND_SENTINEL};
