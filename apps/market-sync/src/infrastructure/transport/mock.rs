//! Mock connector for testing.
//!
//! Each accepted connection hands the test a [`MockSession`]: the frames the
//! client wrote, and a sender for pushing frames back. Dropping the session
//! closes the socket from the server side.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures::channel::mpsc as frame_channel;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::application::ports::{Connector, FrameSink, FrameStream, TransportError, WireFrame};

/// Scripted result of one connect call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockConnect {
    /// Open a session.
    Accept,
    /// Fail with a connect error.
    Refuse(String),
}

/// Server side of an accepted mock connection.
#[derive(Debug)]
pub struct MockSession {
    sent: frame_channel::UnboundedReceiver<WireFrame>,
    push: frame_channel::UnboundedSender<Result<WireFrame, TransportError>>,
}

impl MockSession {
    /// Next text frame the client wrote, skipping control frames.
    ///
    /// Returns `None` once the client side is gone.
    pub async fn next_text(&mut self) -> Option<String> {
        while let Some(frame) = self.sent.next().await {
            if let WireFrame::Text(text) = frame {
                return Some(text);
            }
        }
        None
    }

    /// Next frame the client wrote.
    pub async fn next_frame(&mut self) -> Option<WireFrame> {
        self.sent.next().await
    }

    /// Push a frame to the client.
    pub fn push(&self, frame: WireFrame) {
        let _ = self.push.unbounded_send(Ok(frame));
    }

    /// Push a text frame to the client.
    pub fn push_text(&self, text: impl Into<String>) {
        self.push(WireFrame::Text(text.into()));
    }

    /// Push a transport error to the client.
    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.push.unbounded_send(Err(TransportError::Io {
            message: message.into(),
        }));
    }
}

/// In-memory connector.
#[derive(Debug)]
pub struct MockConnector {
    script: Mutex<VecDeque<MockConnect>>,
    sessions: mpsc::UnboundedSender<MockSession>,
    attempts: AtomicU32,
}

impl MockConnector {
    /// Create a connector and the receiver of its accepted sessions.
    ///
    /// Connect calls beyond the script are accepted.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockSession>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Mutex::new(VecDeque::new()),
            sessions: tx,
            attempts: AtomicU32::new(0),
        };
        (Arc::new(connector), rx)
    }

    /// Queue outcomes for the next connect calls.
    pub fn script(&self, outcomes: impl IntoIterator<Item = MockConnect>) {
        self.script.lock().extend(outcomes);
    }

    /// Number of connect calls so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<(FrameSink, FrameStream), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self.script.lock().pop_front().unwrap_or(MockConnect::Accept);
        if let MockConnect::Refuse(message) = outcome {
            return Err(TransportError::Connect { message });
        }

        let (client_tx, sent) = frame_channel::unbounded();
        let (push, client_rx) = frame_channel::unbounded();
        self.sessions
            .send(MockSession { sent, push })
            .map_err(|_| TransportError::Connect {
                message: "mock server gone".to_string(),
            })?;

        let sink = client_tx.sink_map_err(|_| TransportError::Closed);
        Ok((Box::pin(sink), Box::pin(client_rx)))
    }
}
