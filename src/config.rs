//! Environment configuration shared by the binaries.
//!
//! | Variable               | Meaning                                        | Default          |
//! |------------------------|------------------------------------------------|------------------|
//! | `RECORDWIRE_ADDR`      | `host:port` or `unix:/path`                    | `127.0.0.1:7070` |
//! | `RECORDWIRE_SCHEMA`    | schema file path, `builtin`, or `none`         | `builtin`        |
//! | `RECORDWIRE_SYNTHETIC` | synthetic records added to the seeded store    | `0`              |

use std::path::PathBuf;

use crate::codec::SchemaSource;
use crate::error::{Result, WireError};
use crate::transport::Endpoint;

/// Endpoint variable.
pub const ADDR_VAR: &str = "RECORDWIRE_ADDR";
/// Schema source variable.
pub const SCHEMA_VAR: &str = "RECORDWIRE_SCHEMA";
/// Synthetic record count variable.
pub const SYNTHETIC_VAR: &str = "RECORDWIRE_SYNTHETIC";

/// Default endpoint.
pub const DEFAULT_ADDR: &str = "127.0.0.1:7070";

/// Settings read from the environment.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Where to listen or connect.
    pub endpoint: Endpoint,
    /// Where schemas come from.
    pub schema: SchemaSource,
    /// Synthetic records to generate.
    pub synthetic: usize,
}

impl EnvConfig {
    /// Read the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = Endpoint::parse(
            lookup(ADDR_VAR)
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(DEFAULT_ADDR),
        );

        let schema = match lookup(SCHEMA_VAR).as_deref().map(str::trim) {
            None | Some("") | Some("builtin") => SchemaSource::Builtin,
            Some("none") => SchemaSource::None,
            Some(path) => SchemaSource::File(PathBuf::from(path)),
        };

        let synthetic = match lookup(SYNTHETIC_VAR) {
            None => 0,
            Some(value) => value.trim().parse().map_err(|e| {
                WireError::Config(format!("{}={:?}: {}", SYNTHETIC_VAR, value, e))
            })?,
        };

        Ok(Self {
            endpoint,
            schema,
            synthetic,
        })
    }
}
