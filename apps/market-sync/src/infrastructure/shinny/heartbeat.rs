//! Heartbeat Supervision
//!
//! The market data front pings the client periodically and pushes data
//! frames between pings. Any inbound frame (text, ping or pong) counts as a
//! keepalive and pushes the deadline out. When the deadline elapses the
//! manager emits [`HeartbeatEvent::Timeout`] and the connection is dropped
//! without a close handshake.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Silence tolerated before the connection is considered dead.
    pub timeout: Duration,
    /// How often the deadline is checked.
    pub check_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(11),
            check_interval: Duration::from_secs(1),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(timeout: Duration, check_interval: Duration) -> Self {
        Self {
            timeout,
            check_interval,
        }
    }

    /// Create configuration from `ClientConfig`.
    #[must_use]
    pub fn from_client_config(config: &crate::ClientConfig) -> Self {
        let timeout = config.heartbeat_timeout;
        Self {
            timeout,
            check_interval: (timeout / 4).clamp(Duration::from_millis(10), Duration::from_secs(1)),
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// No inbound frame within the timeout; the transport should be dropped.
    Timeout {
        /// Time since the last inbound frame.
        elapsed: Duration,
    },
}

/// State shared between the heartbeat manager and the socket reader.
#[derive(Debug)]
pub struct HeartbeatState {
    last_inbound: RwLock<Instant>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_inbound: RwLock::new(Instant::now()),
        }
    }

    /// Record that a frame arrived.
    pub fn record_inbound(&self) {
        *self.last_inbound.write() = Instant::now();
    }

    /// Get the time since the last inbound frame.
    #[must_use]
    pub fn time_since_inbound(&self) -> Duration {
        self.last_inbound.read().elapsed()
    }

    /// Reset state for a new connection.
    pub fn reset(&self) {
        self.record_inbound();
    }
}

/// Heartbeat manager that monitors connection health.
///
/// # Example
///
/// ```rust,no_run
/// use market_sync::infrastructure::shinny::heartbeat::{
///     HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState,
/// };
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// async fn example() {
///     let state = Arc::new(HeartbeatState::new());
///     let (event_tx, mut event_rx) = mpsc::channel(1);
///     let cancel = CancellationToken::new();
///
///     let manager = HeartbeatManager::new(HeartbeatConfig::default(), state.clone(), event_tx, cancel);
///     tokio::spawn(manager.run());
///
///     // The socket reader calls `state.record_inbound()` for every frame.
///     if let Some(HeartbeatEvent::Timeout { .. }) = event_rx.recv().await {
///         // Drop the transport and reconnect.
///     }
/// }
/// ```
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run the monitoring loop until cancelled or a timeout is detected.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let elapsed = self.state.time_since_inbound();
                    if elapsed > self.config.timeout {
                        tracing::warn!(
                            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                            timeout_ms = u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX),
                            "Heartbeat timeout detected"
                        );
                        let _ = self.event_tx.send(HeartbeatEvent::Timeout { elapsed }).await;
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(11));
        assert_eq!(config.check_interval, Duration::from_secs(1));
    }

    #[test]
    fn state_records_inbound() {
        let state = HeartbeatState::new();
        *state.last_inbound.write() = Instant::now()
            .checked_sub(Duration::from_secs(5))
            .unwrap();
        assert!(state.time_since_inbound() >= Duration::from_secs(5));

        state.record_inbound();
        assert!(state.time_since_inbound() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn manager_detects_silence() {
        let config = HeartbeatConfig::new(Duration::from_millis(50), Duration::from_millis(10));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(HeartbeatManager::new(config, state, event_tx, cancel).run());

        let event = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
            .await
            .expect("should receive event")
            .expect("channel should not close");
        assert!(matches!(event, HeartbeatEvent::Timeout { elapsed } if elapsed > Duration::from_millis(50)));

        handle.await.expect("task should complete");
    }

    #[tokio::test]
    async fn inbound_frames_keep_connection_alive() {
        let config = HeartbeatConfig::new(Duration::from_millis(80), Duration::from_millis(10));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            HeartbeatManager::new(config, state.clone(), event_tx, cancel.clone()).run(),
        );

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            state.record_inbound();
        }
        assert!(event_rx.try_recv().is_err());

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "manager should shut down on cancellation");
    }
}
