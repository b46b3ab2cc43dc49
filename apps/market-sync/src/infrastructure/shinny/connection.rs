//! Connection Manager
//!
//! Owns the socket to the market data front and drives its lifecycle:
//!
//! ```text
//! Connecting ──open──▶ Open ──drop / timeout──▶ Closed ──wait──▶ Connecting
//!     │                 │                          │
//!     │                 └──close()──▶ Closing ──▶ Closed (no reconnect)
//!     └──────────────── attempts exhausted ───────▶ Dead
//! ```
//!
//! [`Connection`] is the synchronous state machine (buffering, counters,
//! transitions); [`ConnectionManager`] is the task that runs it against a
//! [`Connector`]. Lifecycle events and inbound text frames share one ordered
//! channel of [`ConnectionEvent`]s.
//!
//! # Outbound Buffering
//!
//! Sends made while the socket is not open are queued and flushed in FIFO
//! order on the next open. Whenever the socket closes the queue is cleared:
//! anything queued before a close is lost, anything queued during the
//! reconnect wait goes out on the next open.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{Connector, FrameSink, FrameStream, TransportError, WireFrame};
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors returned to senders.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Reconnection attempts are used up.
    #[error("connection exhausted after {0} reconnection attempts")]
    Exhausted(u32),

    /// The connection was closed by the client.
    #[error("connection closed")]
    Closed,
}

// =============================================================================
// State and Events
// =============================================================================

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Opening the socket.
    Connecting,
    /// Socket open; sends go straight out.
    Open,
    /// Client asked to close.
    Closing,
    /// Socket closed.
    Closed,
    /// Reconnection attempts exhausted. Terminal.
    Dead,
}

impl ConnectionState {
    /// Numeric code for the state gauge.
    #[must_use]
    pub const fn as_code(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Open => 1,
            Self::Closing => 2,
            Self::Closed => 3,
            Self::Dead => 4,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Dead => "dead",
        };
        f.write_str(name)
    }
}

/// Events emitted by the connection manager, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Socket opened and the outbound buffer was flushed.
    Opened,
    /// Socket closed.
    Closed,
    /// Transport or heartbeat failure.
    Error(String),
    /// A reconnection attempt is scheduled.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// No attempts left; the connection is dead. Emitted once.
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// Inbound text frame.
    Message(String),
}

// =============================================================================
// State Machine
// =============================================================================

/// What to do with an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Socket is open; write it now.
    Transmit(String),
    /// Queued until the next open.
    Buffered,
    /// Connection is closing or dead; dropped.
    Rejected,
}

/// What happens after the socket closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Wait `delay`, then make attempt number `attempt`.
    Reconnect {
        /// Attempt number.
        attempt: u32,
        /// Wait before the attempt.
        delay: Duration,
    },
    /// Attempts used up; the connection is now dead.
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// Nothing further (client close, or already dead).
    Stopped,
}

/// Connection lifecycle state machine.
#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
    outbound: VecDeque<String>,
    policy: ReconnectPolicy,
    user_closed: bool,
    exhausted_reported: bool,
}

impl Connection {
    /// Create a connection in the `Connecting` state.
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            state: ConnectionState::Connecting,
            outbound: VecDeque::new(),
            policy: ReconnectPolicy::new(config),
            user_closed: false,
            exhausted_reported: false,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of queued outbound messages.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.outbound.len()
    }

    /// Reconnection attempts made so far.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.policy.attempt_count()
    }

    /// Route an outbound message.
    pub fn send(&mut self, text: String) -> Outbound {
        match self.state {
            ConnectionState::Open => Outbound::Transmit(text),
            ConnectionState::Connecting | ConnectionState::Closed if !self.user_closed => {
                self.outbound.push_back(text);
                Outbound::Buffered
            }
            ConnectionState::Connecting
            | ConnectionState::Closed
            | ConnectionState::Closing
            | ConnectionState::Dead => Outbound::Rejected,
        }
    }

    /// Start a connection attempt.
    pub fn begin_connect(&mut self) {
        if self.state == ConnectionState::Closed && !self.user_closed {
            self.state = ConnectionState::Connecting;
        }
    }

    /// The socket opened. Returns the queued messages, oldest first.
    pub fn on_open(&mut self) -> Vec<String> {
        self.state = ConnectionState::Open;
        self.policy.on_open();
        self.outbound.drain(..).collect()
    }

    /// The client asked to close.
    pub fn close(&mut self) {
        self.user_closed = true;
        if self.state != ConnectionState::Dead {
            self.state = ConnectionState::Closing;
        }
    }

    /// The socket closed (or failed to open).
    ///
    /// Always clears the outbound queue.
    pub fn on_closed(&mut self) -> CloseOutcome {
        self.outbound.clear();

        if self.state == ConnectionState::Dead {
            return CloseOutcome::Stopped;
        }
        self.state = ConnectionState::Closed;
        if self.user_closed {
            return CloseOutcome::Stopped;
        }

        match self.policy.next_delay() {
            Some(delay) => CloseOutcome::Reconnect {
                attempt: self.policy.attempt_count(),
                delay,
            },
            None => {
                self.state = ConnectionState::Dead;
                if self.exhausted_reported {
                    CloseOutcome::Stopped
                } else {
                    self.exhausted_reported = true;
                    CloseOutcome::Exhausted {
                        attempts: self.policy.attempt_count(),
                    }
                }
            }
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

#[derive(Debug)]
enum Command {
    Send(String),
    Close,
}

/// Cloneable handle to a running [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: Arc<RwLock<ConnectionState>>,
    attempts: Arc<RwLock<u32>>,
}

impl ConnectionHandle {
    /// Queue a text frame.
    ///
    /// Buffered while the socket is not open.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is dead or closed.
    pub fn send(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
        match *self.state.read() {
            ConnectionState::Dead => return Err(ConnectionError::Exhausted(*self.attempts.read())),
            ConnectionState::Closing => return Err(ConnectionError::Closed),
            _ => {}
        }
        self.commands
            .send(Command::Send(text.into()))
            .map_err(|_| ConnectionError::Closed)
    }

    /// Close the connection without reconnecting.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }
}

// =============================================================================
// Manager Task
// =============================================================================

enum ConnectStep {
    Connected(FrameSink, FrameStream),
    Failed(TransportError),
    Stop,
}

enum SessionExit {
    Dropped,
    Stopped,
}

/// Task that owns the socket.
pub struct ConnectionManager {
    url: String,
    connector: Arc<dyn Connector>,
    connection: Connection,
    heartbeat: HeartbeatConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state: Arc<RwLock<ConnectionState>>,
    attempts: Arc<RwLock<u32>>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    /// Create a manager, its handle and its event receiver.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        reconnect: ReconnectConfig,
        heartbeat: HeartbeatConfig,
        cancel: CancellationToken,
    ) -> (Self, ConnectionHandle, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(ConnectionState::Connecting));
        let attempts = Arc::new(RwLock::new(0));

        let manager = Self {
            url: url.into(),
            connector,
            connection: Connection::new(reconnect),
            heartbeat,
            commands: command_rx,
            events: event_tx,
            state: Arc::clone(&state),
            attempts: Arc::clone(&attempts),
            cancel,
        };
        let handle = ConnectionHandle {
            commands: command_tx,
            state,
            attempts,
        };
        (manager, handle, event_rx)
    }

    /// Run until closed, cancelled or exhausted.
    pub async fn run(mut self) {
        loop {
            self.connection.begin_connect();
            self.publish_state();
            tracing::info!(url = %self.url, "Connecting to market data front");

            let exit = match self.connect().await {
                ConnectStep::Connected(sink, stream) => self.run_session(sink, stream).await,
                ConnectStep::Failed(e) => {
                    tracing::warn!(error = %e, "Connection attempt failed");
                    self.emit(ConnectionEvent::Error(e.to_string()));
                    SessionExit::Dropped
                }
                ConnectStep::Stop => SessionExit::Stopped,
            };

            if matches!(exit, SessionExit::Stopped) {
                self.connection.close();
            }
            let outcome = self.connection.on_closed();
            self.publish_state();
            self.emit(ConnectionEvent::Closed);

            match outcome {
                CloseOutcome::Reconnect { attempt, delay } => {
                    metrics::record_reconnect();
                    tracing::info!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Reconnecting to market data front"
                    );
                    self.emit(ConnectionEvent::Reconnecting { attempt });

                    if !self.wait(delay).await {
                        self.connection.close();
                        let _ = self.connection.on_closed();
                        self.publish_state();
                        return;
                    }
                }
                CloseOutcome::Exhausted { attempts } => {
                    tracing::error!(attempts, "Reconnection attempts exhausted");
                    self.emit(ConnectionEvent::Exhausted { attempts });
                    return;
                }
                CloseOutcome::Stopped => {
                    tracing::info!("Connection closed");
                    return;
                }
            }
        }
    }

    /// Open the socket while buffering sends.
    async fn connect(&mut self) -> ConnectStep {
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let connect = async move { connector.connect(&url).await };
        tokio::pin!(connect);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return ConnectStep::Stop,
                result = &mut connect => {
                    return match result {
                        Ok((sink, stream)) => ConnectStep::Connected(sink, stream),
                        Err(e) => ConnectStep::Failed(e),
                    };
                }
                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => self.buffer(text),
                    Some(Command::Close) | None => return ConnectStep::Stop,
                },
            }
        }
    }

    /// Pump frames until the socket drops or the client stops.
    async fn run_session(&mut self, mut sink: FrameSink, mut stream: FrameStream) -> SessionExit {
        let flushed = self.connection.on_open();
        self.publish_state();
        tracing::info!(url = %self.url, flushed = flushed.len(), "Connected to market data front");

        for text in flushed {
            if let Err(e) = sink.send(WireFrame::Text(text)).await {
                self.emit(ConnectionEvent::Error(e.to_string()));
                return SessionExit::Dropped;
            }
        }
        self.emit(ConnectionEvent::Opened);

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(1);
        let heartbeat_cancel = self.cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        tokio::spawn(
            HeartbeatManager::new(
                self.heartbeat.clone(),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel,
            )
            .run(),
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = sink.send(WireFrame::Close).await;
                    return SessionExit::Stopped;
                }
                Some(HeartbeatEvent::Timeout { elapsed }) = heartbeat_rx.recv() => {
                    // Dropping both halves terminates the socket without a handshake.
                    self.emit(ConnectionEvent::Error(format!(
                        "heartbeat timeout after {}ms",
                        elapsed.as_millis()
                    )));
                    return SessionExit::Dropped;
                }
                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => {
                        if let Outbound::Transmit(text) = self.connection.send(text)
                            && let Err(e) = sink.send(WireFrame::Text(text)).await
                        {
                            tracing::warn!(error = %e, "Send failed");
                            self.emit(ConnectionEvent::Error(e.to_string()));
                            return SessionExit::Dropped;
                        }
                    }
                    Some(Command::Close) | None => {
                        self.connection.close();
                        self.publish_state();
                        let _ = sink.send(WireFrame::Close).await;
                        let _ = sink.close().await;
                        return SessionExit::Stopped;
                    }
                },
                frame = stream.next() => {
                    if matches!(frame, Some(Ok(_))) {
                        heartbeat_state.record_inbound();
                    }
                    match frame {
                        Some(Ok(WireFrame::Text(text))) => {
                            metrics::record_frame_received();
                            self.emit(ConnectionEvent::Message(text));
                        }
                        Some(Ok(WireFrame::Ping(payload))) => {
                            if let Err(e) = sink.send(WireFrame::Pong(payload)).await {
                                self.emit(ConnectionEvent::Error(e.to_string()));
                                return SessionExit::Dropped;
                            }
                        }
                        Some(Ok(WireFrame::Pong(_))) => {}
                        Some(Ok(WireFrame::Close)) | None => {
                            tracing::info!("Socket closed by peer");
                            return SessionExit::Dropped;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Socket error");
                            self.emit(ConnectionEvent::Error(e.to_string()));
                            return SessionExit::Dropped;
                        }
                    }
                }
            }
        }
    }

    /// Sleep before the next attempt while buffering sends.
    ///
    /// Returns `false` if the client stopped during the wait.
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => self.buffer(text),
                    Some(Command::Close) | None => return false,
                },
            }
        }
    }

    fn buffer(&mut self, text: String) {
        match self.connection.send(text) {
            Outbound::Buffered => {
                tracing::debug!(buffered = self.connection.buffered(), "Buffered outbound message");
            }
            Outbound::Rejected | Outbound::Transmit(_) => {
                tracing::warn!(state = %self.connection.state(), "Dropped outbound message");
            }
        }
    }

    fn publish_state(&self) {
        let state = self.connection.state();
        *self.state.write() = state;
        *self.attempts.write() = self.connection.attempt_count();
        metrics::set_connection_state(state);
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Connection event receiver dropped");
        }
    }
}
