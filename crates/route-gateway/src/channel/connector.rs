//! Transports that open a byte stream to the engine.

use crate::domain::config::BackendAddress;
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// A full-duplex byte stream to the engine.
pub trait BackendStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> BackendStream for T {}

pub type BoxedStream = Box<dyn BackendStream>;

/// Opens new connections to the engine. The channel actor calls this on
/// first use and after every failure.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> io::Result<BoxedStream>;

    /// Human-readable target for logs
    fn describe(&self) -> String;
}

/// TCP transport
#[derive(Debug, Clone)]
pub struct TcpConnector {
    authority: String,
}

impl TcpConnector {
    pub fn new(authority: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect(&self.authority).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.authority)
    }
}

/// Unix domain socket transport
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: std::path::PathBuf,
}

#[cfg(unix)]
impl UnixConnector {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(unix)]
#[async_trait]
impl Connector for UnixConnector {
    async fn connect(&self) -> io::Result<BoxedStream> {
        let stream = tokio::net::UnixStream::connect(&self.path).await?;
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("unix:{}", self.path.display())
    }
}

/// Build the connector for a configured address.
pub fn connector_for(address: &BackendAddress) -> io::Result<Arc<dyn Connector>> {
    match address {
        BackendAddress::Tcp(authority) => Ok(Arc::new(TcpConnector::new(authority.clone()))),
        #[cfg(unix)]
        BackendAddress::Unix(path) => Ok(Arc::new(UnixConnector::new(path.clone()))),
        #[cfg(not(unix))]
        BackendAddress::Unix(path) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("unix sockets are not available: {}", path.display()),
        )),
    }
}

/// In-process transport backed by `tokio::io::duplex`.
///
/// Every successful `connect` hands the engine side of a fresh pipe to the
/// receiver returned by [`MemoryConnector::new`]. Used to drive the channel
/// without a real socket.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<DuplexStream>,
    refusing: Arc<AtomicBool>,
    buffer: usize,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        let connector = Self {
            peers,
            refusing: Arc::new(AtomicBool::new(false)),
            buffer: 64 * 1024,
        };
        (connector, accepted)
    }

    /// Make subsequent connection attempts fail with `ConnectionRefused`.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> io::Result<BoxedStream> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "memory engine refused connection",
            ));
        }
        let (gateway_side, engine_side) = tokio::io::duplex(self.buffer);
        self.peers.send(engine_side).map_err(|_| {
            io::Error::new(io::ErrorKind::ConnectionRefused, "memory engine is gone")
        })?;
        Ok(Box::new(gateway_side))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
