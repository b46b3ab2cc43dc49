//! WebSocket Connector
//!
//! Opens TLS WebSocket connections with `tokio-tungstenite` and maps its
//! messages onto [`WireFrame`]s. Binary and raw frames are not part of the
//! DIFF protocol and are dropped.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::application::ports::{Connector, FrameSink, FrameStream, TransportError, WireFrame};

/// Connector backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a new connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), TransportError> {
        let (ws_stream, _response) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| TransportError::Connect {
                    message: e.to_string(),
                })?;
        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(io_error)
            .with(|frame: WireFrame| future::ready(Ok::<_, TransportError>(to_message(frame))));

        let stream = read.filter_map(|result| {
            future::ready(match result {
                Ok(message) => from_message(message).map(Ok),
                Err(e) => Some(Err(io_error(e))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

fn io_error(error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        other => TransportError::Io {
            message: other.to_string(),
        },
    }
}

fn to_message(frame: WireFrame) -> Message {
    match frame {
        WireFrame::Text(text) => Message::Text(text.into()),
        WireFrame::Ping(payload) => Message::Ping(payload.into()),
        WireFrame::Pong(payload) => Message::Pong(payload.into()),
        WireFrame::Close => Message::Close(None),
    }
}

fn from_message(message: Message) -> Option<WireFrame> {
    match message {
        Message::Text(text) => Some(WireFrame::Text(text.as_str().to_owned())),
        Message::Ping(payload) => Some(WireFrame::Ping(payload.to_vec())),
        Message::Pong(payload) => Some(WireFrame::Pong(payload.to_vec())),
        Message::Close(_) => Some(WireFrame::Close),
        Message::Binary(payload) => {
            tracing::debug!(len = payload.len(), "Ignoring binary frame");
            None
        }
        Message::Frame(_) => None,
    }
}
