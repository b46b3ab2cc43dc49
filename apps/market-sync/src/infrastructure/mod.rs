//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// DIFF protocol client (connection, correlator, dispatch).
pub mod shinny;

/// Socket connectors (WebSocket and in-memory).
pub mod transport;

/// Row sinks for exports.
pub mod export;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
