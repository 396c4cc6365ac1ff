//! Record client.
//!
//! Connects, fetches record "1", the full list and a record that does not
//! exist, then disconnects.

use recordwire::config::EnvConfig;
use recordwire::{Connection, WireError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> recordwire::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = EnvConfig::from_env()?;
    let connection = Connection::builder(config.endpoint)
        .schema_source(config.schema)
        .build();
    connection.observe(|status| tracing::info!(%status, "Connection status"));

    connection.connect().await?;

    let record = connection.get_record("1").await?;
    tracing::info!(id = %record.id, name = %record.name, role = %record.role, "Fetched record");

    let list = connection.list_records().await?;
    tracing::info!(count = list.records.len(), "Fetched record list");

    match connection.get_record("does-not-exist").await {
        Err(WireError::Remote(message)) => tracing::info!(%message, "Lookup rejected as expected"),
        Ok(record) => tracing::warn!(id = %record.id, "Unexpected record"),
        Err(e) => return Err(e),
    }

    connection.disconnect().await
}
