//! Integration tests for recordwire.
//!
//! These drive a real `Connection` against the server side, over in-memory
//! duplex streams and over TCP loopback.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use recordwire::codec::{Codec, SchemaSource, TextCodec};
use recordwire::protocol::{frame, MessageKind, UNKNOWN_KIND_SENTINEL};
use recordwire::server::{register_record_handlers, serve_connection, HandlerRegistry};
use recordwire::store::{MemoryRecordStore, StoreService};
use recordwire::transport::{encode_length, BoxedStream, Connector, MessageBuffer};
use recordwire::{
    BoxFuture, Connection, ConnectionBuilder, ConnectionStatus, Endpoint, Server, WireError,
};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Hands out one end of a duplex pipe whose other end is being served.
struct Served(Mutex<Option<DuplexStream>>);

impl Connector for Served {
    fn connect(&self) -> BoxFuture<'_, recordwire::Result<BoxedStream>> {
        let stream = self.0.lock().unwrap().take();
        Box::pin(async move {
            let stream = stream.ok_or(WireError::NotConnected)?;
            let stream: BoxedStream = Box::new(stream);
            Ok(stream)
        })
    }
}

fn seeded_registry(codec: Codec) -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new(codec);
    register_record_handlers(
        &mut registry,
        Arc::new(StoreService::new(MemoryRecordStore::seeded().with_generated(20))),
    );
    Arc::new(registry)
}

/// Connection wired to `serve_connection` over a duplex stream.
fn served_connection(
    registry: Arc<HandlerRegistry>,
    configure: impl FnOnce(ConnectionBuilder) -> ConnectionBuilder,
) -> Connection {
    let (local, remote) = duplex(256 * 1024);
    tokio::spawn(serve_connection(remote, registry));
    let connector = Served(Mutex::new(Some(local)));
    configure(ConnectionBuilder::with_connector(connector)).build()
}

#[tokio::test]
async fn test_get_record_end_to_end() {
    let connection = served_connection(seeded_registry(Codec::default()), |b| b);
    connection.connect().await.unwrap();

    let record = connection.get_record("1").await.unwrap();
    assert_eq!(record.id, "1");
    assert_eq!(record.name, "Kim Cheolsu");
    assert_eq!(record.age, 30);

    connection.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_call_returns_document() {
    let connection = served_connection(seeded_registry(Codec::default()), |b| b);
    connection.connect().await.unwrap();

    let document = connection.call(MessageKind::GetRecord, "3").await.unwrap();
    assert_eq!(document["email"], "park@example.com");

    connection.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_not_found_surfaces_error_message() {
    let connection = served_connection(seeded_registry(Codec::default()), |b| b);
    connection.connect().await.unwrap();

    match connection.get_record("does-not-exist").await {
        Err(WireError::Remote(message)) => assert_eq!(message, "record does-not-exist not found"),
        other => panic!("expected remote error, got {:?}", other),
    }

    // The connection stays usable after a handler failure.
    assert_eq!(connection.get_record("2").await.unwrap().id, "2");
    assert_eq!(connection.status(), ConnectionStatus::Open);

    connection.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_list_records_in_store_order() {
    let connection = served_connection(seeded_registry(Codec::default()), |b| b);
    connection.connect().await.unwrap();

    let list = connection.list_records().await.unwrap();
    assert_eq!(list.records.len(), 23);
    assert_eq!(list.records[0].id, "1");
    assert_eq!(list.records[3].id, "user1");
    assert_eq!(list.records[22].id, "user20");

    connection.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_text_only_server_with_schema_client() {
    let connection = served_connection(seeded_registry(Codec::text_only()), |b| {
        b.schema_source(SchemaSource::Builtin)
    });
    connection.connect().await.unwrap();

    assert_eq!(connection.get_record("1").await.unwrap().role, "admin");
    assert_eq!(connection.list_records().await.unwrap().records.len(), 23);

    connection.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_schema_responses_smaller_than_text() {
    let registry = seeded_registry(Codec::default());
    let response = registry.dispatch(&frame(2, b"")).await.unwrap();

    let text = seeded_registry(Codec::text_only())
        .dispatch(&frame(2, b""))
        .await
        .unwrap();
    assert!(response.len() < text.len());

    let document = registry
        .codec()
        .decode(&response[1..], "RecordList")
        .await
        .unwrap();
    assert_eq!(TextCodec::encode(&document).unwrap(), text[1..].to_vec());
}

#[tokio::test]
async fn test_unknown_kind_sentinel_on_the_wire() {
    let (mut client, server) = duplex(4096);
    let serve = tokio::spawn(serve_connection(server, seeded_registry(Codec::default())));

    let request = frame(42, b"anything");
    let mut bytes = encode_length(request.len()).to_vec();
    bytes.extend_from_slice(&request);
    client.write_all(&bytes).await.unwrap();
    client.shutdown().await.unwrap();

    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    let responses = MessageBuffer::new().push(&received).unwrap();

    assert_eq!(responses.len(), 1);
    assert_eq!(&responses[0][..], &UNKNOWN_KIND_SENTINEL);
    assert!(serve.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_missing_handler_rejects_call() {
    let mut registry = HandlerRegistry::new(Codec::default());
    registry.register(MessageKind::GetRecord, |id: String| async move { Ok(id) });

    let connection = served_connection(Arc::new(registry), |b| b);
    connection.connect().await.unwrap();

    assert!(matches!(
        connection.list_records().await,
        Err(WireError::UnknownKind(2))
    ));

    connection.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_tcp_loopback() {
    let server = Server::builder(Endpoint::parse("127.0.0.1:0"))
        .service(StoreService::new(MemoryRecordStore::seeded()))
        .bind()
        .await
        .unwrap();
    let endpoint = server.local_endpoint().clone();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let running = tokio::spawn(server.run_until(async {
        let _ = stop_rx.await;
    }));

    let connection = Connection::builder(endpoint)
        .request_timeout(Some(Duration::from_secs(5)))
        .build();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    connection.observe(move |status| sink.lock().unwrap().push(status));

    connection.connect().await.unwrap();
    assert_eq!(connection.get_record("1").await.unwrap().id, "1");
    assert_eq!(connection.list_records().await.unwrap().records.len(), 3);
    connection.disconnect().await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        [
            ConnectionStatus::Connecting,
            ConnectionStatus::Open,
            ConnectionStatus::Closing,
            ConnectionStatus::Closed,
        ]
    );

    stop_tx.send(()).unwrap();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_connect_refused() {
    // Bind then drop to get a port nobody listens on.
    let endpoint = {
        let server = Server::builder(Endpoint::parse("127.0.0.1:0"))
            .bind()
            .await
            .unwrap();
        server.local_endpoint().clone()
    };

    let connection = Connection::new(endpoint);
    assert!(matches!(connection.connect().await, Err(WireError::Io(_))));
    assert_eq!(connection.status(), ConnectionStatus::Closed);
    assert!(matches!(
        connection.get_record("1").await,
        Err(WireError::NotConnected)
    ));
}
