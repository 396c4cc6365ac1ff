//! JSON vs binary size comparison for encoded responses.

use std::fmt;

/// Size of one payload in both encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeComparison {
    /// Bytes of the JSON text form.
    pub json_bytes: usize,
    /// Bytes actually put on the wire.
    pub binary_bytes: usize,
}

impl SizeComparison {
    /// Create a comparison.
    pub fn new(json_bytes: usize, binary_bytes: usize) -> Self {
        Self {
            json_bytes,
            binary_bytes,
        }
    }

    /// Percentage saved relative to JSON. Zero when the JSON form is empty.
    pub fn savings_percent(&self) -> f64 {
        if self.json_bytes == 0 {
            return 0.0;
        }
        (self.json_bytes as f64 - self.binary_bytes as f64) / self.json_bytes as f64 * 100.0
    }
}

impl fmt::Display for SizeComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "json {} bytes, binary {} bytes, saved {:.2}%",
            self.json_bytes,
            self.binary_bytes,
            self.savings_percent()
        )
    }
}
