//! Handler registry for dispatching requests by message kind.
//!
//! Each [`MessageKind`] maps to at most one handler. A handler receives the
//! request body decoded into its own type and returns a serializable
//! response; the registry encodes the response with the kind's schema and
//! frames it with the same kind.
//!
//! # Example
//!
//! ```ignore
//! use recordwire::codec::Codec;
//! use recordwire::protocol::MessageKind;
//! use recordwire::server::HandlerRegistry;
//!
//! let mut registry = HandlerRegistry::new(Codec::default());
//!
//! registry.register(MessageKind::GetRecord, |id: String| async move {
//!     lookup(&id).await
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::Level;

use crate::codec::{Codec, Document, Encoded, SizeComparison, TextCodec};
use crate::error::{Result, WireError};
use crate::protocol::{
    error_frame, frame, unframe, MessageKind, GENERIC_FAILURE, UNKNOWN_KIND_SENTINEL,
};
use crate::BoxFuture;

/// Request body decoded from a raw frame payload.
pub trait FromPayload: Sized + Send + 'static {
    /// Decode the payload.
    fn from_payload(payload: Bytes) -> Result<Self>;
}

/// The payload as UTF-8 text, e.g. a record id.
impl FromPayload for String {
    fn from_payload(payload: Bytes) -> Result<Self> {
        String::from_utf8(payload.to_vec())
            .map_err(|e| WireError::DeserializationFailure(e.to_string()))
    }
}

/// The payload is ignored.
impl FromPayload for () {
    fn from_payload(_payload: Bytes) -> Result<Self> {
        Ok(())
    }
}

/// The payload untouched.
impl FromPayload for Bytes {
    fn from_payload(payload: Bytes) -> Result<Self> {
        Ok(payload)
    }
}

/// Trait for request handlers.
pub trait Handler: Send + Sync + 'static {
    /// Handle one request, producing the response document.
    fn call(&self, payload: Bytes) -> BoxFuture<'static, Result<Document>>;
}

/// Wrapper that decodes the payload before calling the handler and turns
/// its response into a document.
pub struct TypedHandler<F, T, R, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: FromPayload,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    handler: Arc<F>,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, R, Fut> TypedHandler<F, T, R, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: FromPayload,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R, Fut> Handler for TypedHandler<F, T, R, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: FromPayload,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    fn call(&self, payload: Bytes) -> BoxFuture<'static, Result<Document>> {
        let handler = self.handler.clone();
        Box::pin(async move {
            let request = T::from_payload(payload)?;
            let response = (*handler)(request).await?;
            serde_json::to_value(&response)
                .map_err(|e| WireError::SerializationFailure(e.to_string()))
        })
    }
}

/// Registry mapping message kinds to handlers.
pub struct HandlerRegistry {
    handlers: HashMap<MessageKind, Box<dyn Handler>>,
    codec: Codec,
}

impl HandlerRegistry {
    /// Create an empty registry encoding responses with `codec`.
    pub fn new(codec: Codec) -> Self {
        Self {
            handlers: HashMap::new(),
            codec,
        }
    }

    /// Register the handler for `kind`, replacing any previous one.
    pub fn register<F, T, R, Fut>(&mut self, kind: MessageKind, handler: F) -> &mut Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        T: FromPayload,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        if self
            .handlers
            .insert(kind, Box::new(TypedHandler::new(handler)))
            .is_some()
        {
            tracing::debug!(%kind, "Handler replaced");
        }
        self
    }

    /// Whether `kind` has a handler.
    pub fn contains(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// The codec encoding responses.
    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Turn one inbound message into the response to send back.
    ///
    /// Returns `None` only for a malformed (empty) message, which gets no
    /// response. Every other outcome is a response:
    ///
    /// - no handler for the kind: the `[0, 0]` sentinel
    /// - handler failure: an error frame carrying the failure message
    /// - anything else going wrong: an error frame with a generic message
    pub async fn dispatch(&self, message: &Bytes) -> Option<Bytes> {
        let frame = match unframe(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Dropping inbound message: {}", e);
                return None;
            }
        };

        let handler = frame
            .message_kind()
            .and_then(|kind| self.handlers.get(&kind).map(|handler| (kind, handler)));
        let Some((kind, handler)) = handler else {
            tracing::warn!(kind = frame.kind(), "Unknown request kind");
            return Some(Bytes::from_static(&UNKNOWN_KIND_SENTINEL));
        };

        match self.respond(kind, handler.as_ref(), frame.payload).await {
            Ok(response) => Some(response),
            Err(e) if e.is_handler_failure() => {
                tracing::debug!(%kind, "Handler failed: {}", e);
                Some(error_frame(&e.to_string()))
            }
            Err(e) => {
                tracing::error!(%kind, "Request failed: {}", e);
                Some(error_frame(GENERIC_FAILURE))
            }
        }
    }

    async fn respond(
        &self,
        kind: MessageKind,
        handler: &dyn Handler,
        payload: Bytes,
    ) -> Result<Bytes> {
        // Own task, so a panic comes back as a JoinError.
        let document = tokio::spawn(handler.call(payload))
            .await
            .map_err(|e| WireError::TaskFailed(e.to_string()))??;

        let encoded = match kind.response_schema() {
            Some(schema) => self.codec.encode_document(&document, schema).await?,
            None => Encoded::text(TextCodec::encode(&document)?),
        };

        if tracing::enabled!(Level::DEBUG) {
            let json_bytes = TextCodec::encode(&document)?.len();
            let comparison = SizeComparison::new(json_bytes, encoded.bytes.len());
            tracing::debug!(%kind, encoding = ?encoded.encoding, "{}", comparison);
        }

        Ok(frame(kind.as_u8(), &encoded.bytes))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new(Codec::default())
    }
}
