//! Reconnection Policy
//!
//! Fixed-interval reconnection with a bounded attempt counter. The counter
//! increments on every attempt and, unless `reset_on_open` is set, survives
//! successful opens: a front that keeps dropping the connection exhausts the
//! budget even if each attempt briefly succeeds.

use std::time::Duration;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before every reconnection attempt.
    pub interval: Duration,
    /// Attempts allowed before the connection is declared dead (0 = unlimited).
    pub max_attempts: u32,
    /// Reset the attempt counter after every successful open.
    pub reset_on_open: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 3,
            reset_on_open: false,
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(interval: Duration, max_attempts: u32, reset_on_open: bool) -> Self {
        Self {
            interval,
            max_attempts,
            reset_on_open,
        }
    }

    /// Create configuration from `ClientConfig`.
    #[must_use]
    pub const fn from_client_config(config: &crate::ClientConfig) -> Self {
        Self {
            interval: config.reconnect_interval,
            max_attempts: config.max_reconnect_attempts,
            reset_on_open: config.reconnect_reset_on_open,
        }
    }
}

/// Reconnection policy.
///
/// # Example
///
/// ```rust
/// use market_sync::infrastructure::shinny::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::new(Duration::from_millis(10), 2, false));
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(10)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(10)));
/// assert_eq!(policy.next_delay(), None);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Count the next attempt and return the delay before it.
    ///
    /// Returns `None` once max attempts have been used.
    #[must_use]
    pub const fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt_count += 1;
        Some(self.config.interval)
    }

    /// Notify the policy that a connection opened.
    pub const fn on_open(&mut self) {
        if self.config.reset_on_open {
            self.reset();
        }
    }

    /// Reset the attempt counter.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Configured maximum.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32, reset_on_open: bool) -> ReconnectPolicy {
        ReconnectPolicy::new(ReconnectConfig::new(
            Duration::from_millis(100),
            max_attempts,
            reset_on_open,
        ))
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.interval, Duration::from_secs(3));
        assert_eq!(config.max_attempts, 3);
        assert!(!config.reset_on_open);
    }

    #[test]
    fn fixed_interval() {
        let mut policy = policy(0, false);
        for _ in 0..5 {
            assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        }
    }

    #[test]
    fn max_attempts() {
        let mut policy = policy(3, false);

        assert!(policy.next_delay().is_some());
        assert_eq!(policy.attempt_count(), 1);
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.attempt_count(), 3);

        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
        assert_eq!(policy.attempt_count(), 3);
    }

    #[test]
    fn open_keeps_counter_by_default() {
        let mut policy = policy(3, false);
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        policy.on_open();
        assert_eq!(policy.attempt_count(), 2);
    }

    #[test]
    fn open_resets_counter_when_enabled() {
        let mut policy = policy(3, true);
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        policy.on_open();
        assert_eq!(policy.attempt_count(), 0);
        assert!(policy.should_retry());
    }

    #[test]
    fn unlimited_attempts() {
        let mut policy = policy(0, false);
        for _ in 0..1000 {
            assert!(policy.should_retry());
            assert!(policy.next_delay().is_some());
        }
    }
}
