//! Message schemas for the compact binary encoding.
//!
//! A schema set is a JSON document naming each message and its ordered
//! fields:
//!
//! ```json
//! {
//!   "package": "records",
//!   "messages": {
//!     "Record": { "fields": [ { "name": "id", "type": "string" } ] },
//!     "RecordList": { "fields": [ { "name": "records", "type": "Record", "repeated": true } ] }
//!   }
//! }
//! ```
//!
//! Encoding a document against a message turns every object into an array
//! in field order (absent fields become `nil`). Decoding reverses it. Both
//! directions validate field types, so a document that passes through the
//! compact form comes back unchanged.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Result, WireError};

/// Schema set shipped with the crate.
pub const BUILTIN_SCHEMA: &str = include_str!("../../schema/records.json");

/// Type of a single field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum FieldType {
    /// UTF-8 string.
    String,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 32-bit integer.
    Uint32,
    /// Unsigned 64-bit integer.
    Uint64,
    /// Boolean.
    Bool,
    /// Any JSON number.
    Double,
    /// Nested message, by name.
    Message(String),
}

impl From<String> for FieldType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "string" => FieldType::String,
            "int32" => FieldType::Int32,
            "int64" => FieldType::Int64,
            "uint32" => FieldType::Uint32,
            "uint64" => FieldType::Uint64,
            "bool" => FieldType::Bool,
            "double" => FieldType::Double,
            _ => FieldType::Message(name),
        }
    }
}

/// One field of a message.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldSchema {
    /// Field name in the document form.
    pub name: String,
    /// Element type.
    #[serde(rename = "type")]
    pub ty: FieldType,
    /// Whether the field holds a list of `ty`.
    #[serde(default)]
    pub repeated: bool,
}

/// Ordered fields of a message.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageSchema {
    /// Fields in wire order.
    pub fields: Vec<FieldSchema>,
}

impl MessageSchema {
    fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }
}

/// Named collection of message schemas.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaSet {
    /// Package name, informational only.
    #[serde(default)]
    pub package: String,
    /// Messages by name.
    pub messages: HashMap<String, MessageSchema>,
}

impl SchemaSet {
    /// Parse and check a schema set from its JSON definition.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Schema`] if the definition is not valid JSON,
    /// a field references an unknown message, or a message declares the same
    /// field twice.
    pub fn from_json(definition: &str) -> Result<Self> {
        let set: SchemaSet = serde_json::from_str(definition)
            .map_err(|e| WireError::Schema(format!("invalid schema definition: {}", e)))?;
        set.check()?;
        Ok(set)
    }

    /// The schema set shipped with the crate (`Record`, `RecordList`).
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_SCHEMA)
    }

    /// Look up a message by name.
    pub fn get(&self, name: &str) -> Option<&MessageSchema> {
        self.messages.get(name)
    }

    /// Number of messages in the set.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if the set has no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn check(&self) -> Result<()> {
        for (name, message) in &self.messages {
            for (i, field) in message.fields.iter().enumerate() {
                if message.fields[..i].iter().any(|f| f.name == field.name) {
                    return Err(WireError::Schema(format!(
                        "{}: duplicate field `{}`",
                        name, field.name
                    )));
                }
                if let FieldType::Message(target) = &field.ty {
                    if !self.messages.contains_key(target) {
                        return Err(WireError::Schema(format!(
                            "{}.{}: unknown type `{}`",
                            name, field.name, target
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate `document` against message `name` and convert it to the
    /// compact positional form.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::SerializationFailure`] if the message is unknown
    /// or the document does not conform.
    pub fn compact(&self, name: &str, document: &Value) -> Result<Value> {
        let message = self
            .get(name)
            .ok_or_else(|| WireError::SerializationFailure(format!("unknown schema `{}`", name)))?;
        self.compact_message(message, document, name)
            .map_err(WireError::SerializationFailure)
    }

    /// Convert the compact form of message `name` back to a document.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::DeserializationFailure`] if the message is
    /// unknown or the value does not have the message's shape.
    pub fn expand(&self, name: &str, compact: &Value) -> Result<Value> {
        let message = self.get(name).ok_or_else(|| {
            WireError::DeserializationFailure(format!("unknown schema `{}`", name))
        })?;
        self.expand_message(message, compact, name)
            .map_err(WireError::DeserializationFailure)
    }

    fn compact_message(
        &self,
        message: &MessageSchema,
        value: &Value,
        path: &str,
    ) -> std::result::Result<Value, String> {
        let Value::Object(map) = value else {
            return Err(format!("{}: expected object", path));
        };
        if let Some(unknown) = map.keys().find(|k| !message.has_field(k)) {
            return Err(format!("{}: unknown field `{}`", path, unknown));
        }

        let mut out = Vec::with_capacity(message.fields.len());
        for field in &message.fields {
            let item = match map.get(&field.name) {
                None => Value::Null,
                Some(v) => {
                    let path = format!("{}.{}", path, field.name);
                    self.map_field(field, v, &path, Self::compact_single)?
                }
            };
            out.push(item);
        }
        Ok(Value::Array(out))
    }

    fn expand_message(
        &self,
        message: &MessageSchema,
        value: &Value,
        path: &str,
    ) -> std::result::Result<Value, String> {
        let Value::Array(items) = value else {
            return Err(format!("{}: expected array", path));
        };
        if items.len() != message.fields.len() {
            return Err(format!(
                "{}: expected {} fields, got {}",
                path,
                message.fields.len(),
                items.len()
            ));
        }

        let mut map = Map::new();
        for (field, item) in message.fields.iter().zip(items) {
            if item.is_null() {
                continue;
            }
            let path = format!("{}.{}", path, field.name);
            let expanded = self.map_field(field, item, &path, Self::expand_single)?;
            map.insert(field.name.clone(), expanded);
        }
        Ok(Value::Object(map))
    }

    /// Apply `single` to a field value, element-wise when repeated.
    fn map_field(
        &self,
        field: &FieldSchema,
        value: &Value,
        path: &str,
        single: fn(&Self, &FieldType, &Value, &str) -> std::result::Result<Value, String>,
    ) -> std::result::Result<Value, String> {
        if !field.repeated {
            return single(self, &field.ty, value, path);
        }
        let Value::Array(items) = value else {
            return Err(format!("{}: expected list", path));
        };
        items
            .iter()
            .enumerate()
            .map(|(i, item)| single(self, &field.ty, item, &format!("{}[{}]", path, i)))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Value::Array)
    }

    fn compact_single(
        &self,
        ty: &FieldType,
        value: &Value,
        path: &str,
    ) -> std::result::Result<Value, String> {
        match ty {
            FieldType::Message(name) => {
                let message = self
                    .get(name)
                    .ok_or_else(|| format!("{}: unknown type `{}`", path, name))?;
                self.compact_message(message, value, path)
            }
            scalar => check_scalar(scalar, value, path).map(|()| value.clone()),
        }
    }

    fn expand_single(
        &self,
        ty: &FieldType,
        value: &Value,
        path: &str,
    ) -> std::result::Result<Value, String> {
        match ty {
            FieldType::Message(name) => {
                let message = self
                    .get(name)
                    .ok_or_else(|| format!("{}: unknown type `{}`", path, name))?;
                self.expand_message(message, value, path)
            }
            scalar => check_scalar(scalar, value, path).map(|()| value.clone()),
        }
    }
}

fn check_scalar(ty: &FieldType, value: &Value, path: &str) -> std::result::Result<(), String> {
    let ok = match ty {
        FieldType::String => value.is_string(),
        FieldType::Int32 => value
            .as_i64()
            .is_some_and(|n| i32::try_from(n).is_ok()),
        FieldType::Int64 => value.as_i64().is_some(),
        FieldType::Uint32 => value
            .as_u64()
            .is_some_and(|n| u32::try_from(n).is_ok()),
        FieldType::Uint64 => value.as_u64().is_some(),
        FieldType::Bool => value.is_boolean(),
        FieldType::Double => value.is_number(),
        FieldType::Message(_) => false,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("{}: expected {:?}, got {}", path, ty, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Value {
        json!({
            "id": "1",
            "name": "Kim Cheolsu",
            "email": "kim@example.com",
            "age": 30,
            "role": "admin"
        })
    }

    #[test]
    fn test_builtin_loads() {
        let set = SchemaSet::builtin().unwrap();
        assert!(set.get("Record").is_some());
        assert!(set.get("RecordList").is_some());
        assert_eq!(set.package, "records");
    }

    #[test]
    fn test_field_type_parsing() {
        assert_eq!(FieldType::from("int32".to_string()), FieldType::Int32);
        assert_eq!(
            FieldType::from("Record".to_string()),
            FieldType::Message("Record".to_string())
        );
    }

    #[test]
    fn test_compact_record_is_positional() {
        let set = SchemaSet::builtin().unwrap();
        let compact = set.compact("Record", &record()).unwrap();
        assert_eq!(
            compact,
            json!(["1", "Kim Cheolsu", "kim@example.com", 30, "admin"])
        );
    }

    #[test]
    fn test_compact_expand_list() {
        let set = SchemaSet::builtin().unwrap();
        let list = json!({ "records": [record(), record()] });

        let compact = set.compact("RecordList", &list).unwrap();
        let expanded = set.expand("RecordList", &compact).unwrap();
        assert_eq!(expanded, list);
    }

    #[test]
    fn test_absent_field_stays_absent() {
        let set = SchemaSet::builtin().unwrap();
        let partial = json!({ "id": "9" });

        let compact = set.compact("Record", &partial).unwrap();
        assert_eq!(compact, json!(["9", null, null, null, null]));
        assert_eq!(set.expand("Record", &compact).unwrap(), partial);
    }

    #[test]
    fn test_validation_failures() {
        let set = SchemaSet::builtin().unwrap();

        let mut wrong_type = record();
        wrong_type["age"] = json!("thirty");
        assert!(matches!(
            set.compact("Record", &wrong_type),
            Err(WireError::SerializationFailure(_))
        ));

        let mut extra = record();
        extra["nickname"] = json!("kim");
        assert!(set.compact("Record", &extra).is_err());

        let mut null_field = record();
        null_field["role"] = Value::Null;
        assert!(set.compact("Record", &null_field).is_err());

        let mut overflow = record();
        overflow["age"] = json!(u64::from(u32::MAX) + 1);
        assert!(set.compact("Record", &overflow).is_err());

        assert!(set.compact("Record", &json!([1, 2])).is_err());
        assert!(set.compact("Missing", &record()).is_err());
    }

    #[test]
    fn test_expand_rejects_wrong_shape() {
        let set = SchemaSet::builtin().unwrap();
        assert!(matches!(
            set.expand("Record", &json!(["1", "a"])),
            Err(WireError::DeserializationFailure(_))
        ));
        assert!(set.expand("Record", &json!(123)).is_err());
        assert!(set.expand("RecordList", &json!([[1]])).is_err());
    }

    #[test]
    fn test_check_rejects_unknown_reference() {
        let result = SchemaSet::from_json(
            r#"{"messages": {"A": {"fields": [{"name": "b", "type": "B"}]}}}"#,
        );
        assert!(matches!(result, Err(WireError::Schema(_))));
    }

    #[test]
    fn test_check_rejects_duplicate_field() {
        let result = SchemaSet::from_json(
            r#"{"messages": {"A": {"fields": [
                {"name": "x", "type": "string"},
                {"name": "x", "type": "bool"}
            ]}}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_json_definition() {
        assert!(SchemaSet::from_json("not json").is_err());
    }
}
