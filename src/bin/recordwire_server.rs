//! Record server.
//!
//! Serves the seeded in-memory store, optionally extended with synthetic
//! records, until interrupted. See [`recordwire::config`] for the
//! environment variables it reads.

use recordwire::config::EnvConfig;
use recordwire::store::{MemoryRecordStore, StoreService};
use recordwire::Server;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> recordwire::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = EnvConfig::from_env()?;
    let store = MemoryRecordStore::seeded().with_generated(config.synthetic);
    tracing::info!(records = store.len(), schema = ?config.schema, "Starting record server");

    let server = Server::builder(config.endpoint)
        .service(StoreService::new(store))
        .schema_source(config.schema)
        .bind()
        .await?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
            }
        })
        .await
}
