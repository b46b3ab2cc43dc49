//! Chart Feed Port (Driven Port)
//!
//! What the export service needs from a market data client: subscribe and
//! release charts, read the chart book, and wait for updates.

use tokio::sync::watch;

use crate::domain::chart::{ChartBook, ChartError, ChartRequest, ChartSubscription};

/// Chart feed error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The request was rejected before sending.
    #[error(transparent)]
    Chart(#[from] ChartError),

    /// The feed cannot send.
    #[error("feed unavailable: {0}")]
    Unavailable(String),
}

/// Whether the feed can still deliver data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedLiveness {
    /// Connected or reconnecting.
    Live,
    /// Reconnection attempts are exhausted.
    Exhausted,
    /// Closed by the client.
    Closed,
}

/// Source of chart windows.
pub trait ChartFeed: Send + Sync {
    /// Subscribe or reposition a chart.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid or cannot be sent.
    fn set_chart(&self, request: ChartRequest) -> Result<ChartSubscription, FeedError>;

    /// Release a chart.
    ///
    /// # Errors
    ///
    /// Returns an error if the release cannot be sent.
    fn release_chart(&self, chart_id: &str) -> Result<bool, FeedError>;

    /// Mark a chart's current window as consumed.
    fn mark_exhausted(&self, chart_id: &str);

    /// Read the chart book.
    fn with_charts<R>(&self, f: impl FnOnce(&ChartBook) -> R) -> R;

    /// Receiver ticked whenever the book may have changed.
    fn updates(&self) -> watch::Receiver<u64>;

    /// Current liveness.
    fn liveness(&self) -> FeedLiveness;
}
