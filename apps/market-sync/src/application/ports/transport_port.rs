//! Transport Port (Driven Port)
//!
//! Interface for opening a framed, bidirectional socket to the market data
//! front. The connection manager owns the framing lifecycle; adapters only
//! move frames.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};

/// One frame on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Ping with payload.
    Ping(Vec<u8>),
    /// Pong with payload.
    Pong(Vec<u8>),
    /// Close frame.
    Close,
}

/// Transport error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("connect failed: {message}")]
    Connect {
        /// Error details.
        message: String,
    },

    /// Error while sending or receiving.
    #[error("transport I/O error: {message}")]
    Io {
        /// Error details.
        message: String,
    },

    /// The socket is closed.
    #[error("transport closed")]
    Closed,
}

/// Outbound half of an open socket.
pub type FrameSink = Pin<Box<dyn Sink<WireFrame, Error = TransportError> + Send>>;

/// Inbound half of an open socket.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<WireFrame, TransportError>> + Send>>;

/// Opens sockets.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a socket to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the connection fails.
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), TransportError>;
}
