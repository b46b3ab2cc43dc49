//! Prometheus Metrics Module
//!
//! Exposes client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: inbound frames received and dropped as malformed
//! - **Connection**: lifecycle state and reconnection attempts
//! - **Charts**: records merged into chart series
//! - **Export**: rows written by the exporter
//!
//! # Integration
//!
//! When a metrics port is configured the exporter serves `/metrics` on it;
//! otherwise the recorder is installed without a listener and the handle can
//! be rendered on demand.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::infrastructure::shinny::connection::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// With a non-zero `port` an HTTP listener serving `/metrics` is started on
/// `0.0.0.0:port` (requires a Tokio runtime). With port `0` only the recorder
/// is installed and its handle kept for [`get_metrics_handle`].
///
/// # Errors
///
/// Returns an error if the recorder or listener cannot be installed.
pub fn init_metrics(port: u16) -> Result<(), MetricsError> {
    if port == 0 {
        if PROMETHEUS_HANDLE.get().is_none() {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| MetricsError::Installation(e.to_string()))?;
            let _ = PROMETHEUS_HANDLE.set(handle);
        }
    } else {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| MetricsError::Installation(e.to_string()))?;
        tracing::info!(%addr, "Prometheus metrics exporter started");
    }

    register_metrics();
    Ok(())
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_sync_frames_received_total",
        "Total inbound frames received from the market data front"
    );
    describe_counter!(
        "market_sync_frames_dropped_total",
        "Total inbound frames dropped as malformed"
    );

    describe_gauge!(
        "market_sync_connection_state",
        "Connection state (0=connecting, 1=open, 2=closing, 3=closed, 4=dead)"
    );
    describe_counter!(
        "market_sync_reconnects_total",
        "Total reconnection attempts"
    );

    describe_counter!(
        "market_sync_records_merged_total",
        "Total bar and tick records merged into chart series"
    );
    describe_counter!(
        "market_sync_rows_exported_total",
        "Total aligned rows written by the exporter"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Reasons an inbound frame was dropped.
#[derive(Debug, Clone, Copy)]
pub enum DropReason {
    /// Not valid JSON.
    InvalidJson,
    /// Valid JSON with an unexpected shape.
    UnexpectedShape,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::UnexpectedShape => "unexpected_shape",
        }
    }
}

/// Record an inbound frame.
pub fn record_frame_received() {
    counter!("market_sync_frames_received_total").increment(1);
}

/// Record a malformed frame.
pub fn record_frame_dropped(reason: DropReason) {
    counter!(
        "market_sync_frames_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("market_sync_connection_state").set(f64::from(state.as_code()));
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("market_sync_reconnects_total").increment(1);
}

/// Record records merged into chart series.
pub fn record_records_merged(count: u64) {
    counter!("market_sync_records_merged_total").increment(count);
}

/// Record rows written by the exporter.
pub fn record_rows_exported(count: u64) {
    counter!("market_sync_rows_exported_total").increment(count);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reason_as_str() {
        assert_eq!(DropReason::InvalidJson.as_str(), "invalid_json");
        assert_eq!(DropReason::UnexpectedShape.as_str(), "unexpected_shape");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_frame_received();
        record_frame_dropped(DropReason::InvalidJson);
        set_connection_state(ConnectionState::Open);
        record_reconnect();
        record_records_merged(3);
        record_rows_exported(2);
    }
}
