//! Initiator connection and its event loop.
//!
//! A [`Connection`] owns one transport session at a time. Each session runs
//! a single event-loop task that owns the pending-request table, reads
//! inbound messages and forwards outbound frames to the writer task:
//!
//! ```text
//! call() ─► mpsc<Command> ─┐
//!                          ├─► event loop ─► WriterHandle ─► Socket
//! Socket ─► MessageReader ─┘        │
//!                                   └─► PendingTable ─► oneshot ─► call()
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::dispatcher::{handle_inbound, Continuation, PendingTable};
use super::status::{ConnectionStatus, ObserverId, StatusBoard};
use crate::codec::{Codec, Document, SchemaSource};
use crate::error::{Result, WireError};
use crate::model::{Record, RecordList};
use crate::protocol::{frame, MessageKind};
use crate::transport::{
    spawn_writer_task, Connector, Endpoint, MessageReader, WriterConfig, WriterHandle,
    DEFAULT_MAX_MESSAGE_SIZE,
};

/// Default time a request waits for its response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time `disconnect()` waits for the peer to close its side.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the command channel into the event loop.
const COMMAND_CHANNEL_CAPACITY: usize = 256;

enum Command {
    Call {
        kind: MessageKind,
        payload: Bytes,
        generation: u64,
        reply: Continuation,
    },
    Expire {
        kind: MessageKind,
        generation: u64,
    },
    Close,
}

/// Builder for a [`Connection`].
pub struct ConnectionBuilder {
    connector: Arc<dyn Connector>,
    request_timeout: Option<Duration>,
    close_timeout: Duration,
    writer_config: WriterConfig,
    max_message_size: u32,
    schema_source: SchemaSource,
    schema_load_timeout: Option<Duration>,
    codec: Option<Codec>,
}

impl ConnectionBuilder {
    /// Connect to `endpoint`.
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_connector(endpoint)
    }

    /// Open streams through a custom connector.
    pub fn with_connector(connector: impl Connector) -> Self {
        Self {
            connector: Arc::new(connector),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            writer_config: WriterConfig::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            schema_source: SchemaSource::default(),
            schema_load_timeout: None,
            codec: None,
        }
    }

    /// Set the request timeout. `None` waits forever.
    ///
    /// Default: 30 seconds
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set how long `disconnect()` waits for the peer to close.
    ///
    /// Default: 5 seconds
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the maximum pending outbound messages.
    ///
    /// Default: 1024
    pub fn max_pending_messages(mut self, limit: usize) -> Self {
        self.writer_config.max_pending_messages = limit;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.writer_config.backpressure_timeout = timeout;
        self
    }

    /// Set the largest inbound message accepted.
    ///
    /// Default: 16 MiB
    pub fn max_message_size(mut self, size: u32) -> Self {
        self.max_message_size = size;
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

    /// Build the connection. Nothing is opened until `connect()`.
    pub fn build(self) -> Connection {
        let codec = self.codec.unwrap_or_else(|| {
            Codec::with_load_timeout(self.schema_source, self.schema_load_timeout)
        });
        Connection {
            connector: self.connector,
            codec,
            request_timeout: self.request_timeout,
            close_timeout: self.close_timeout,
            writer_config: self.writer_config,
            max_message_size: self.max_message_size,
            status: Arc::new(StatusBoard::new()),
            commands: Mutex::new(None),
            session: tokio::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }
}

struct Session {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// Client side of the record protocol.
///
/// At most one request per message kind is in flight: a second request of
/// the same kind replaces the first, whose caller then waits until its
/// timeout or until the connection closes.
pub struct Connection {
    connector: Arc<dyn Connector>,
    codec: Codec,
    request_timeout: Option<Duration>,
    close_timeout: Duration,
    writer_config: WriterConfig,
    max_message_size: u32,
    status: Arc<StatusBoard>,
    /// Sender into the live session's event loop.
    commands: Mutex<Option<mpsc::Sender<Command>>>,
    /// Serializes connect and disconnect.
    session: tokio::sync::Mutex<Option<Session>>,
    generation: AtomicU64,
}

impl Connection {
    /// Connection to `endpoint` with default settings.
    pub fn new(endpoint: Endpoint) -> Self {
        ConnectionBuilder::new(endpoint).build()
    }

    /// Create a builder.
    pub fn builder(endpoint: Endpoint) -> ConnectionBuilder {
        ConnectionBuilder::new(endpoint)
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    /// The codec decoding responses.
    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Register a status observer.
    ///
    /// Observers run synchronously on the task causing the transition, in
    /// registration order. They must not block.
    pub fn observe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        self.status.observe(Arc::new(observer))
    }

    /// Remove a status observer.
    pub fn unobserve(&self, id: ObserverId) -> bool {
        self.status.remove(id)
    }

    /// Open the transport.
    ///
    /// No-op when already open or connecting.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the stream cannot be opened; the
    /// status is then `Closed`.
    pub async fn connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if matches!(
            self.status.get(),
            ConnectionStatus::Open | ConnectionStatus::Connecting
        ) {
            return Ok(());
        }

        // A session that ended on its own still has a finished task to reap.
        if let Some(old) = session.take() {
            let _ = old.task.await;
        }

        self.status.set(ConnectionStatus::Connecting);

        let stream = match self.connector.connect().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Connect failed: {}", e);
                self.status.set(ConnectionStatus::Closed);
                return Err(e);
            }
        };

        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, _writer_task) = spawn_writer_task(write_half, self.writer_config.clone());
        let reader = MessageReader::with_max_message_size(read_half, self.max_message_size);

        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        *self.lock_commands() = Some(tx.clone());
        self.status.set(ConnectionStatus::Open);

        let task = tokio::spawn(event_loop(
            reader,
            writer,
            rx,
            self.status.clone(),
            self.close_timeout,
        ));
        *session = Some(Session { commands: tx, task });
        Ok(())
    }

    /// Close the transport and wait for the session to end.
    ///
    /// Requests still outstanding fail with [`WireError::ConnectionClosed`].
    /// No-op when disconnected or already closed.
    pub async fn disconnect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        self.lock_commands().take();

        let Some(current) = session.take() else {
            return Ok(());
        };

        if self.status.transition(
            &[ConnectionStatus::Connecting, ConnectionStatus::Open],
            ConnectionStatus::Closing,
        ) {
            // The loop may already be gone if the peer closed first.
            let _ = current.commands.send(Command::Close).await;
        }

        if let Err(e) = current.task.await {
            tracing::error!("Connection event loop failed: {}", e);
            self.status.set(ConnectionStatus::Closed);
        }
        Ok(())
    }

    /// Send a request and wait for the decoded response.
    ///
    /// # Errors
    ///
    /// - [`WireError::NotConnected`] unless the connection is open
    /// - [`WireError::Remote`] when the peer answered with an error frame
    /// - [`WireError::UnknownKind`] when the peer has no handler for `kind`
    /// - [`WireError::RequestTimeout`] when the request timeout elapsed
    /// - [`WireError::ConnectionClosed`] when the session ended first
    pub async fn call(&self, kind: MessageKind, payload: impl Into<Bytes>) -> Result<Document> {
        let schema = kind
            .response_schema()
            .ok_or(WireError::UnknownKind(kind.as_u8()))?;
        let response = self.request(kind, payload.into()).await?;
        self.codec.decode(&response, schema).await
    }

    /// Like [`call`](Self::call), deserializing into `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        kind: MessageKind,
        payload: impl Into<Bytes>,
    ) -> Result<T> {
        let document = self.call(kind, payload).await?;
        serde_json::from_value(document)
            .map_err(|e| WireError::DeserializationFailure(e.to_string()))
    }

    /// Fetch one record by id.
    pub async fn get_record(&self, id: &str) -> Result<Record> {
        self.call_as(MessageKind::GetRecord, Bytes::copy_from_slice(id.as_bytes()))
            .await
    }

    /// Fetch every record.
    pub async fn list_records(&self) -> Result<RecordList> {
        self.call_as(MessageKind::ListRecords, Bytes::new()).await
    }

    async fn request(&self, kind: MessageKind, payload: Bytes) -> Result<Bytes> {
        if self.status.get() != ConnectionStatus::Open {
            return Err(WireError::NotConnected);
        }
        let commands = self.lock_commands().clone().ok_or(WireError::NotConnected)?;

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        commands
            .send(Command::Call {
                kind,
                payload,
                generation,
                reply,
            })
            .await
            .map_err(|_| WireError::NotConnected)?;

        let outcome = match self.request_timeout {
            None => rx.await,
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(%kind, ?timeout, "Request timed out");
                    let _ = commands.send(Command::Expire { kind, generation }).await;
                    return Err(WireError::RequestTimeout(kind));
                }
            },
        };

        outcome.map_err(|_| WireError::ConnectionClosed)?
    }

    fn lock_commands(&self) -> std::sync::MutexGuard<'_, Option<mpsc::Sender<Command>>> {
        self.commands.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Event loop of one session.
async fn event_loop<R>(
    mut reader: MessageReader<R>,
    writer: WriterHandle,
    mut commands: mpsc::Receiver<Command>,
    status: Arc<StatusBoard>,
    close_timeout: Duration,
) where
    R: AsyncRead + Unpin,
{
    let mut table = PendingTable::new();
    let mut peer_closed = false;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Call { kind, payload, generation, reply }) => {
                    match writer.send(frame(kind.as_u8(), &payload)).await {
                        Ok(()) => {
                            table.register(kind, generation, reply);
                        }
                        Err(e) => {
                            let _ = reply.send(Err(e));
                        }
                    }
                }
                Some(Command::Expire { kind, generation }) => {
                    table.expire(kind, generation);
                }
                Some(Command::Close) | None => break,
            },
            inbound = reader.next_message() => match inbound {
                Ok(Some(message)) => handle_inbound(&mut table, message),
                Ok(None) => {
                    tracing::debug!("Peer closed the connection");
                    peer_closed = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!("Read failed, closing connection: {}", e);
                    peer_closed = true;
                    break;
                }
            },
        }
    }

    status.set(ConnectionStatus::Closing);

    // Dropping the last writer handle shuts down our write half.
    drop(writer);

    if !peer_closed {
        let drain = async {
            while let Ok(Some(message)) = reader.next_message().await {
                handle_inbound(&mut table, message);
            }
        };
        if tokio::time::timeout(close_timeout, drain).await.is_err() {
            tracing::debug!(?close_timeout, "Peer did not close in time");
        }
    }

    commands.close();
    while let Ok(command) = commands.try_recv() {
        if let Command::Call { reply, .. } = command {
            let _ = reply.send(Err(WireError::ConnectionClosed));
        }
    }

    let failed = table.fail_all();
    if failed > 0 {
        tracing::debug!(failed, "Outstanding requests failed on close");
    }
    status.set(ConnectionStatus::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::error_frame;
    use crate::transport::{BoxedStream, MessageBuffer};
    use crate::BoxFuture;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    /// Hands out one end of a duplex pipe.
    struct DuplexConnector(Mutex<Option<DuplexStream>>);

    impl Connector for DuplexConnector {
        fn connect(&self) -> BoxFuture<'_, Result<BoxedStream>> {
            let stream = self.0.lock().unwrap().take();
            Box::pin(async move {
                let stream = stream.ok_or_else(|| {
                    WireError::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "already used",
                    ))
                })?;
                let stream: BoxedStream = Box::new(stream);
                Ok(stream)
            })
        }
    }

    /// Peer end speaking raw frames.
    struct Peer {
        stream: DuplexStream,
        buffer: MessageBuffer,
        ready: Vec<Bytes>,
    }

    impl Peer {
        async fn recv(&mut self) -> Option<Bytes> {
            loop {
                if !self.ready.is_empty() {
                    return Some(self.ready.remove(0));
                }
                let mut chunk = [0u8; 1024];
                let n = self.stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    return None;
                }
                self.ready.extend(self.buffer.push(&chunk[..n]).unwrap());
            }
        }

        async fn send(&mut self, message: Bytes) {
            let mut bytes = crate::transport::encode_length(message.len()).to_vec();
            bytes.extend_from_slice(&message);
            self.stream.write_all(&bytes).await.unwrap();
        }
    }

    fn pair(builder: impl FnOnce(ConnectionBuilder) -> ConnectionBuilder) -> (Connection, Peer) {
        let (local, remote) = duplex(64 * 1024);
        let connector = DuplexConnector(Mutex::new(Some(local)));
        let connection = builder(ConnectionBuilder::with_connector(connector)).build();
        let peer = Peer {
            stream: remote,
            buffer: MessageBuffer::new(),
            ready: Vec::new(),
        };
        (connection, peer)
    }

    fn record_json(id: &str) -> Bytes {
        let json = format!(
            r#"{{"id":"{id}","name":"N","email":"e@example.com","age":1,"role":"member"}}"#
        );
        frame(1, json.as_bytes())
    }

    #[tokio::test]
    async fn test_call_before_connect_is_rejected() {
        let (connection, _peer) = pair(|b| b);
        let result = connection.get_record("1").await;
        assert!(matches!(result, Err(WireError::NotConnected)));
    }

    #[tokio::test]
    async fn test_status_order_on_connect_and_disconnect() {
        let (connection, mut peer) = pair(|b| b);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        connection.observe(move |s| sink.lock().unwrap().push(s));

        connection.connect().await.unwrap();
        // Second connect is a no-op.
        connection.connect().await.unwrap();

        let closer = tokio::spawn(async move {
            // Close our side once the initiator shut its write half.
            while peer.recv().await.is_some() {}
            peer.stream.shutdown().await.unwrap();
        });

        connection.disconnect().await.unwrap();
        closer.await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            [
                ConnectionStatus::Connecting,
                ConnectionStatus::Open,
                ConnectionStatus::Closing,
                ConnectionStatus::Closed,
            ]
        );
        assert_eq!(connection.status(), ConnectionStatus::Closed);

        // Disconnect again is a no-op.
        connection.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_connect_reports_closed() {
        let (connection, _peer) = pair(|b| b.close_timeout(Duration::from_millis(20)));
        connection.connect().await.unwrap();
        connection.disconnect().await.unwrap();

        // The duplex connector can only be used once.
        let result = connection.connect().await;
        assert!(matches!(result, Err(WireError::Io(_))));
        assert_eq!(connection.status(), ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn test_call_resolves_with_matching_kind() {
        let (connection, mut peer) = pair(|b| b);
        connection.connect().await.unwrap();

        let server = tokio::spawn(async move {
            let request = peer.recv().await.unwrap();
            assert_eq!(&request[..], b"\x01abc");
            peer.send(record_json("abc")).await;
            peer
        });

        let record = connection.get_record("abc").await.unwrap();
        assert_eq!(record.id, "abc");
        let _peer = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_second_call_of_same_kind_replaces_first() {
        let (connection, mut peer) = pair(|b| b.request_timeout(None));
        let connection = Arc::new(connection);
        connection.connect().await.unwrap();

        let first = tokio::spawn({
            let connection = connection.clone();
            async move { connection.get_record("first").await }
        });
        assert_eq!(&peer.recv().await.unwrap()[..], b"\x01first");

        let second = tokio::spawn({
            let connection = connection.clone();
            async move { connection.get_record("second").await }
        });
        assert_eq!(&peer.recv().await.unwrap()[..], b"\x01second");

        peer.send(record_json("second")).await;
        assert_eq!(second.await.unwrap().unwrap().id, "second");

        // The first caller is never answered while the connection is open.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!first.is_finished());

        peer.stream.shutdown().await.unwrap();
        assert!(matches!(
            first.await.unwrap(),
            Err(WireError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_error_frame_surfaces_as_remote_error() {
        let (connection, mut peer) = pair(|b| b);
        connection.connect().await.unwrap();

        let server = tokio::spawn(async move {
            peer.recv().await.unwrap();
            peer.send(error_frame("record does-not-exist not found")).await;
            peer
        });

        match connection.get_record("does-not-exist").await {
            Err(WireError::Remote(message)) => {
                assert_eq!(message, "record does-not-exist not found")
            }
            other => panic!("unexpected {:?}", other),
        }
        let _peer = server.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_frees_slot() {
        let (connection, mut peer) = pair(|b| b.request_timeout(Some(Duration::from_secs(1))));
        connection.connect().await.unwrap();

        let result = connection.list_records().await;
        assert!(matches!(
            result,
            Err(WireError::RequestTimeout(MessageKind::ListRecords))
        ));

        // A late response for the expired request is dropped, and a fresh
        // request still works.
        assert_eq!(&peer.recv().await.unwrap()[..], b"\x02");
        peer.send(frame(2, br#"{"records":[]}"#)).await;

        let server = tokio::spawn(async move {
            peer.recv().await.unwrap();
            peer.send(frame(2, br#"{"records":[]}"#)).await;
            peer
        });
        let list = connection.list_records().await.unwrap();
        assert!(list.records.is_empty());
        let _peer = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_fails_outstanding_requests() {
        let (connection, mut peer) = pair(|b| b.request_timeout(None));
        let connection = Arc::new(connection);
        connection.connect().await.unwrap();

        let pending = tokio::spawn({
            let connection = connection.clone();
            async move { connection.list_records().await }
        });
        peer.recv().await.unwrap();
        drop(peer);

        assert!(matches!(
            pending.await.unwrap(),
            Err(WireError::ConnectionClosed)
        ));
        assert_eq!(connection.status(), ConnectionStatus::Closed);
        assert!(matches!(
            connection.get_record("1").await,
            Err(WireError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_after_peer_close_stays_closed() {
        let (connection, peer) = pair(|b| b);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        connection.observe(move |s| sink.lock().unwrap().push(s));

        connection.connect().await.unwrap();
        drop(peer);

        tokio::time::timeout(Duration::from_secs(5), async {
            while connection.status() != ConnectionStatus::Closed {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        connection.disconnect().await.unwrap();

        assert_eq!(connection.status(), ConnectionStatus::Closed);
        assert_eq!(
            *seen.lock().unwrap(),
            [
                ConnectionStatus::Connecting,
                ConnectionStatus::Open,
                ConnectionStatus::Closing,
                ConnectionStatus::Closed,
            ]
        );
    }
}
