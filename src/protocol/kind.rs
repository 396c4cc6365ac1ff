//! Message kinds carried in the first byte of every frame.

use std::fmt;

/// Kind byte of the error envelope.
pub const ERROR_KIND: u8 = 255;

/// Response sent when the receiver has no handler for a request kind.
///
/// Deliberately not an error frame: it decodes as kind 0 with a single zero
/// byte of payload.
pub const UNKNOWN_KIND_SENTINEL: [u8; 2] = [0, 0];

/// Logical message type.
///
/// Requests and responses of the same operation share a kind; the error
/// envelope has its own reserved kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Single record lookup. Request payload is the UTF-8 record id.
    GetRecord = 1,
    /// Whole record list. Request payload is empty.
    ListRecords = 2,
    /// Error envelope `{"error": message}`, always text encoded.
    Error = ERROR_KIND,
}

impl MessageKind {
    /// Every kind that can be requested.
    pub const REQUESTS: [MessageKind; 2] = [MessageKind::GetRecord, MessageKind::ListRecords];

    /// Map a kind byte to a known kind.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(MessageKind::GetRecord),
            2 => Some(MessageKind::ListRecords),
            ERROR_KIND => Some(MessageKind::Error),
            _ => None,
        }
    }

    /// The kind byte.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Schema used to encode the response body of this kind.
    ///
    /// `None` for the error envelope, which is never schema encoded.
    pub fn response_schema(self) -> Option<&'static str> {
        match self {
            MessageKind::GetRecord => Some("Record"),
            MessageKind::ListRecords => Some("RecordList"),
            MessageKind::Error => None,
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = crate::error::WireError;

    fn try_from(byte: u8) -> Result<Self, crate::error::WireError> {
        MessageKind::from_u8(byte).ok_or(crate::error::WireError::UnknownKind(byte))
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> u8 {
        kind.as_u8()
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::GetRecord => "get-record",
            MessageKind::ListRecords => "list-records",
            MessageKind::Error => "error",
        };
        write!(f, "{}({})", name, self.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_bytes() {
        assert_eq!(MessageKind::GetRecord.as_u8(), 1);
        assert_eq!(MessageKind::ListRecords.as_u8(), 2);
        assert_eq!(MessageKind::Error.as_u8(), 255);
    }

    #[test]
    fn test_from_u8() {
        for byte in 0..=u8::MAX {
            match MessageKind::from_u8(byte) {
                Some(kind) => assert_eq!(kind.as_u8(), byte),
                None => assert!(![1, 2, 255].contains(&byte)),
            }
        }
    }

    #[test]
    fn test_try_from_unknown() {
        let err = MessageKind::try_from(7).unwrap_err();
        assert!(matches!(err, crate::error::WireError::UnknownKind(7)));
    }

    #[test]
    fn test_response_schemas() {
        assert_eq!(MessageKind::GetRecord.response_schema(), Some("Record"));
        assert_eq!(MessageKind::ListRecords.response_schema(), Some("RecordList"));
        assert_eq!(MessageKind::Error.response_schema(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(MessageKind::GetRecord.to_string(), "get-record(1)");
    }
}
