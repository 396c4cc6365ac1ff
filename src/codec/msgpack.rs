//! MsgPack codec using `rmp-serde`.
//!
//! Carries the compact (positional) form produced by the schema layer:
//! every message is a msgpack array whose elements follow the schema's
//! field order, so no field names travel on the wire.

use std::io::Cursor;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, WireError};

/// MessagePack codec for schema-shaped documents.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a compact document to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(value)?)
    }

    /// Decode MsgPack bytes into a compact document.
    ///
    /// The whole input must be consumed; trailing bytes are an error so that
    /// text that happens to start with a valid msgpack scalar is rejected.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a single msgpack value.
    pub fn decode_value(bytes: &[u8]) -> Result<Value> {
        let mut cursor = Cursor::new(bytes);
        let value = {
            let mut de = rmp_serde::Deserializer::new(&mut cursor);
            Value::deserialize(&mut de)?
        };

        let consumed = cursor.position() as usize;
        if consumed != bytes.len() {
            return Err(WireError::DeserializationFailure(format!(
                "{} trailing bytes after msgpack value",
                bytes.len() - consumed
            )));
        }
        Ok(value)
    }
}
