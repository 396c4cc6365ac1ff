//! Text codec - UTF-8 JSON fallback.
//!
//! Used whenever schema encoding is unavailable and, unconditionally, for
//! error envelopes.
//!
//! # Example
//!
//! ```
//! use recordwire::codec::TextCodec;
//! use serde_json::json;
//!
//! let bytes = TextCodec::encode(&json!({"error": "boom"})).unwrap();
//! assert_eq!(&bytes[..], br#"{"error":"boom"}"#);
//!
//! let value: serde_json::Value = TextCodec::decode(&bytes).unwrap();
//! assert_eq!(value["error"], "boom");
//! ```

use crate::error::Result;

/// JSON text codec.
pub struct TextCodec;

impl TextCodec {
    /// Encode a value as compact UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be represented as JSON
    /// (e.g. a map with non-string keys).
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode UTF-8 JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not valid UTF-8 JSON for type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
