//! Server builder, accept loop and per-connection serve loop.
//!
//! The [`ServerBuilder`] wires a [`RecordService`] into a [`HandlerRegistry`]
//! and binds the endpoint. The [`Server`] then:
//! 1. Accepts connections
//! 2. Spawns one serve task per connection
//! 3. Reads messages and dispatches them strictly one at a time
//!
//! # Example
//!
//! ```ignore
//! use recordwire::{Endpoint, Server};
//!
//! #[tokio::main]
//! async fn main() -> recordwire::Result<()> {
//!     let server = Server::builder(Endpoint::parse("127.0.0.1:7070"))
//!         .bind()
//!         .await?;
//!
//!     server.run_until(async { tokio::signal::ctrl_c().await.ok(); }).await
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use super::handlers::register_record_handlers;
use super::registry::HandlerRegistry;
use crate::codec::{Codec, SchemaSource};
use crate::error::Result;
use crate::store::{MemoryRecordStore, RecordService, StoreService};
use crate::transport::{
    spawn_writer_task, Endpoint, Listener, MessageReader, WriterConfig, DEFAULT_MAX_MESSAGE_SIZE,
};

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Writer task settings.
    pub writer: WriterConfig,
    /// Largest inbound message accepted.
    pub max_message_size: u32,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            writer: WriterConfig::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Builder for configuring and binding a [`Server`].
pub struct ServerBuilder {
    endpoint: Endpoint,
    service: Option<Arc<dyn RecordService>>,
    schema_source: SchemaSource,
    schema_load_timeout: Option<Duration>,
    codec: Option<Codec>,
    options: ServeOptions,
}

impl ServerBuilder {
    /// Create a builder listening on `endpoint`.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            service: None,
            schema_source: SchemaSource::default(),
            schema_load_timeout: None,
            codec: None,
            options: ServeOptions::default(),
        }
    }

    /// Set the record service handlers delegate to.
    ///
    /// Default: the seeded in-memory store
    pub fn service(mut self, service: impl RecordService) -> Self {
        self.service = Some(Arc::new(service));
        self
    }

    /// Set a shared record service.
    pub fn shared_service(mut self, service: Arc<dyn RecordService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Where the response schemas come from.
    ///
    /// Default: the built-in schema set
    pub fn schema_source(mut self, source: SchemaSource) -> Self {
        self.schema_source = source;
        self
    }

    /// Give up on loading schemas after `timeout` and use text instead.
    pub fn schema_load_timeout(mut self, timeout: Duration) -> Self {
        self.schema_load_timeout = Some(timeout);
        self
    }

    /// Share an existing codec, overriding the schema settings.
    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Set the maximum pending outbound messages per connection.
    ///
    /// Default: 1024
    pub fn max_pending_messages(mut self, limit: usize) -> Self {
        self.options.writer.max_pending_messages = limit;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.options.writer.channel_capacity = capacity;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.options.writer.backpressure_timeout = timeout;
        self
    }

    /// Set the largest inbound message accepted.
    ///
    /// Default: 16 MiB
    pub fn max_message_size(mut self, size: u32) -> Self {
        self.options.max_message_size = size;
        self
    }

    /// Build the handler registry without binding.
    pub fn build_registry(&mut self) -> HandlerRegistry {
        let codec = self.codec.take().unwrap_or_else(|| {
            Codec::with_load_timeout(
                std::mem::take(&mut self.schema_source),
                self.schema_load_timeout,
            )
        });
        let service = self
            .service
            .take()
            .unwrap_or_else(|| Arc::new(StoreService::new(MemoryRecordStore::seeded())));

        let mut registry = HandlerRegistry::new(codec);
        register_record_handlers(&mut registry, service);
        registry
    }

    /// Bind the endpoint.
    pub async fn bind(mut self) -> Result<Server> {
        let registry = Arc::new(self.build_registry());
        let listener = Listener::bind(&self.endpoint).await?;
        tracing::info!(endpoint = %listener.local_endpoint(), "Listening");

        Ok(Server {
            registry,
            listener,
            options: self.options,
        })
    }
}

/// A bound record server.
pub struct Server {
    registry: Arc<HandlerRegistry>,
    listener: Listener,
    options: ServeOptions,
}

impl Server {
    /// Create a builder.
    pub fn builder(endpoint: Endpoint) -> ServerBuilder {
        ServerBuilder::new(endpoint)
    }

    /// The bound endpoint, with the resolved port for TCP.
    pub fn local_endpoint(&self) -> &Endpoint {
        self.listener.local_endpoint()
    }

    /// The handler registry shared by all connections.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<()> {
        loop {
            self.accept_one().await?;
        }
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Connections already being served keep running until their peer
    /// closes them.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutting down");
                    return Ok(());
                }
                accepted = self.accept_one() => accepted?,
            }
        }
    }

    async fn accept_one(&self) -> Result<()> {
        let (stream, peer) = self.listener.accept().await?;
        tracing::debug!(%peer, "Accepted connection");

        let registry = self.registry.clone();
        let options = self.options.clone();
        tokio::spawn(async move {
            match serve_connection_with(stream, registry, options).await {
                Ok(()) => tracing::debug!(%peer, "Connection closed"),
                Err(e) => tracing::warn!(%peer, "Connection ended with error: {}", e),
            }
        });
        Ok(())
    }
}

/// Serve one connection with default settings until the peer closes it.
pub async fn serve_connection<S>(stream: S, registry: Arc<HandlerRegistry>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    serve_connection_with(stream, registry, ServeOptions::default()).await
}

/// Serve one connection until the peer closes it.
///
/// Messages are handled one at a time in arrival order, so responses leave
/// in the order their requests came in. A failed send is logged and the
/// loop keeps reading.
pub async fn serve_connection_with<S>(
    stream: S,
    registry: Arc<HandlerRegistry>,
    options: ServeOptions,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (writer, writer_task) = spawn_writer_task(write_half, options.writer);
    let mut reader = MessageReader::with_max_message_size(read_half, options.max_message_size);

    let result = loop {
        match reader.next_message().await {
            Ok(Some(message)) => {
                let Some(response) = registry.dispatch(&message).await else {
                    continue;
                };
                if let Err(e) = writer.send(response).await {
                    tracing::warn!("Failed to send response: {}", e);
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    drop(writer);
    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("Writer task ended with error: {}", e),
        Err(e) => tracing::error!("Writer task panicked: {}", e),
    }
    result
}
