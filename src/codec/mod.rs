//! Codec module - payload encoding with schema-first, text-fallback policy.
//!
//! - [`Codec`] - encodes values against a named schema, falling back to JSON text
//! - [`SchemaSet`] - message definitions driving the compact encoding
//! - [`MsgPackCodec`] - MessagePack carrier for the compact form
//! - [`TextCodec`] - UTF-8 JSON, the fallback and the error-envelope encoding
//!
//! # Policy
//!
//! Encoding never fails for a value that has a JSON form: a missing schema
//! set, an unknown schema name, or a value that does not validate all
//! degrade to text. Decoding tries the schema first and then text, and only
//! reports [`WireError::DeserializationFailure`] when both fail.
//!
//! # Example
//!
//! ```
//! use recordwire::codec::{Codec, Encoding, SchemaSource};
//! use serde_json::json;
//!
//! # tokio_test_block(async {
//! let codec = Codec::new(SchemaSource::Builtin);
//! let doc = json!({"id": "1", "name": "Kim", "email": "kim@example.com", "age": 30, "role": "admin"});
//!
//! let encoded = codec.encode(&doc, "Record").await.unwrap();
//! assert_eq!(encoded.encoding, Encoding::Schema);
//! assert_eq!(codec.decode(&encoded.bytes, "Record").await.unwrap(), doc);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

mod msgpack;
mod report;
mod schema;
mod source;
mod text;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use msgpack::MsgPackCodec;
pub use report::SizeComparison;
pub use schema::{FieldSchema, FieldType, MessageSchema, SchemaSet, BUILTIN_SCHEMA};
pub use source::{SchemaCache, SchemaLoader, SchemaSource};
pub use text::TextCodec;

use crate::error::{Result, WireError};

/// Generic document form of any payload.
pub type Document = serde_json::Value;

/// Which encoding produced a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Compact schema encoding (MessagePack).
    Schema,
    /// UTF-8 JSON text.
    Text,
}

/// Encoded payload.
#[derive(Debug, Clone)]
pub struct Encoded {
    /// Payload bytes.
    pub bytes: Bytes,
    /// Encoding used.
    pub encoding: Encoding,
}

impl Encoded {
    fn new(bytes: Vec<u8>, encoding: Encoding) -> Self {
        Self {
            bytes: Bytes::from(bytes),
            encoding,
        }
    }

    /// Wrap bytes already encoded as text.
    pub fn text(bytes: Vec<u8>) -> Self {
        Self::new(bytes, Encoding::Text)
    }

    /// Take the payload bytes.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

/// Schema-aware codec.
///
/// Cheap to clone; clones share one schema cache, so the schema set is
/// loaded at most once no matter how many connections use the codec.
#[derive(Clone)]
pub struct Codec {
    schemas: Arc<SchemaCache>,
}

impl Codec {
    /// Create a codec loading schemas from `source` on first use.
    pub fn new(source: SchemaSource) -> Self {
        Self::with_load_timeout(source, None)
    }

    /// Create a codec whose schema load gives up after `timeout`.
    pub fn with_load_timeout(source: SchemaSource, timeout: Option<Duration>) -> Self {
        Self {
            schemas: Arc::new(SchemaCache::new(source, timeout)),
        }
    }

    /// Create a codec that always uses the text encoding.
    pub fn text_only() -> Self {
        Self::new(SchemaSource::None)
    }

    /// Schema set, loading it on first use. `None` if unavailable.
    pub async fn schemas(&self) -> Option<Arc<SchemaSet>> {
        self.schemas.get().await
    }

    /// Encode a value against schema `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::SerializationFailure`] only if the value has no
    /// JSON form at all.
    pub async fn encode<T: Serialize + ?Sized>(&self, value: &T, schema: &str) -> Result<Encoded> {
        let document = serde_json::to_value(value)
            .map_err(|e| WireError::SerializationFailure(e.to_string()))?;
        self.encode_document(&document, schema).await
    }

    /// Encode a document against schema `schema`.
    pub async fn encode_document(&self, document: &Document, schema: &str) -> Result<Encoded> {
        if let Some(set) = self.schemas().await {
            match set
                .compact(schema, document)
                .and_then(|compact| MsgPackCodec::encode_value(&compact))
            {
                Ok(bytes) => return Ok(Encoded::new(bytes, Encoding::Schema)),
                Err(e) => tracing::debug!(schema, "Schema encoding skipped, using text: {}", e),
            }
        }

        TextCodec::encode(document)
            .map(|bytes| Encoded::new(bytes, Encoding::Text))
            .map_err(|e| WireError::SerializationFailure(e.to_string()))
    }

    /// Decode bytes produced for schema `schema` into a document.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::DeserializationFailure`] if the bytes are neither
    /// a valid schema encoding nor JSON text.
    pub async fn decode(&self, bytes: &[u8], schema: &str) -> Result<Document> {
        if let Some(set) = self.schemas().await {
            match MsgPackCodec::decode_value(bytes)
                .and_then(|compact| set.expand(schema, &compact))
            {
                Ok(document) => return Ok(document),
                Err(e) => tracing::debug!(schema, "Schema decoding failed, trying text: {}", e),
            }
        }

        TextCodec::decode(bytes)
            .map_err(|e| WireError::DeserializationFailure(e.to_string()))
    }

    /// Decode bytes into a typed value.
    pub async fn decode_as<T: DeserializeOwned>(&self, bytes: &[u8], schema: &str) -> Result<T> {
        let document = self.decode(bytes, schema).await?;
        serde_json::from_value(document)
            .map_err(|e| WireError::DeserializationFailure(e.to_string()))
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(SchemaSource::Builtin)
    }
}
