//! Socket endpoints.
//!
//! - TCP: `host:port`
//! - Unix: Unix Domain Socket path (Unix only)
//!
//! # Example
//!
//! ```ignore
//! use recordwire::transport::{Endpoint, Listener};
//!
//! let listener = Listener::bind(&Endpoint::parse("unix:/tmp/records.sock")).await?;
//! let (stream, peer) = listener.accept().await?;
//! ```

use std::fmt;
#[cfg(unix)]
use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

use crate::error::Result;
use crate::BoxFuture;

/// Prefix selecting a Unix socket in [`Endpoint::parse`].
pub const UNIX_PREFIX: &str = "unix:";

/// A bidirectional byte stream.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Stream for T {}

/// Type-erased connected stream.
pub type BoxedStream = Box<dyn Stream>;

/// Opens streams for a connection.
///
/// [`Endpoint`] is the production implementation; tests plug in in-memory
/// streams.
pub trait Connector: Send + Sync + 'static {
    /// Open a new stream.
    fn connect(&self) -> BoxFuture<'_, Result<BoxedStream>>;
}

/// Where a server listens or a connection connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP address, `host:port`.
    Tcp(String),
    /// Unix domain socket path.
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Endpoint {
    /// Parse `unix:/path` or a TCP `host:port`.
    pub fn parse(s: &str) -> Self {
        #[cfg(unix)]
        {
            if let Some(path) = s.strip_prefix(UNIX_PREFIX) {
                return Endpoint::Unix(PathBuf::from(path));
            }
        }
        Endpoint::Tcp(s.to_string())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => f.write_str(addr),
            #[cfg(unix)]
            Endpoint::Unix(path) => write!(f, "{}{}", UNIX_PREFIX, path.display()),
        }
    }
}

impl Connector for Endpoint {
    fn connect(&self) -> BoxFuture<'_, Result<BoxedStream>> {
        Box::pin(async move {
            let stream: BoxedStream = match self {
                Endpoint::Tcp(addr) => {
                    let stream = TcpStream::connect(addr.as_str()).await?;
                    stream.set_nodelay(true)?;
                    Box::new(stream)
                }
                #[cfg(unix)]
                Endpoint::Unix(path) => Box::new(tokio::net::UnixStream::connect(path).await?),
            };
            Ok(stream)
        })
    }
}

enum Inner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

/// Bound listening socket.
///
/// A Unix socket file is removed when the listener is dropped.
pub struct Listener {
    inner: Inner,
    endpoint: Endpoint,
}

impl Listener {
    /// Bind to `endpoint`.
    ///
    /// For Unix sockets, removes any stale socket file at the path first.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr.as_str()).await?;
                // Resolve port 0 to the port actually bound.
                let local = listener.local_addr()?;
                Ok(Self {
                    inner: Inner::Tcp(listener),
                    endpoint: Endpoint::Tcp(local.to_string()),
                })
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = tokio::net::UnixListener::bind(path)?;
                Ok(Self {
                    inner: Inner::Unix(listener),
                    endpoint: endpoint.clone(),
                })
            }
        }
    }

    /// Accept a single connection, returning the stream and a peer label.
    pub async fn accept(&self) -> Result<(BoxedStream, String)> {
        match &self.inner {
            Inner::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                let stream: BoxedStream = Box::new(stream);
                Ok((stream, addr.to_string()))
            }
            #[cfg(unix)]
            Inner::Unix(listener) => {
                let (stream, _addr) = listener.accept().await?;
                let stream: BoxedStream = Box::new(stream);
                Ok((stream, self.endpoint.to_string()))
            }
        }
    }

    /// The bound endpoint. For TCP this carries the resolved port.
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            if let Endpoint::Unix(path) = &self.endpoint {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}
