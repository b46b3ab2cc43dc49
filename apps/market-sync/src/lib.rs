#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Sync - DIFF Market Data Client
//!
//! Keeps one WebSocket connection to a DIFF market data front, mirrors the
//! pushed chart and quote state locally and exports time-aligned
//! multi-symbol series page by page.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure state and algorithms
//!   - `duration`: bar duration labels
//!   - `streaming`: typed fragments of the data tree
//!   - `chart`: chart requests, windows, series and the readiness gate
//!   - `quote`: latest quote per symbol
//!   - `align`: multi-symbol row alignment
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: connector, chart feed and row sink interfaces
//!   - `services`: the paginating exporter
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `shinny`: connection manager, request correlator and client
//!   - `transport`: WebSocket and in-memory connectors
//!   - `export`: CSV row sink
//!   - `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! DIFF front ──► Connection ──► Client dispatch ──► Chart book ──► Exporter ──► CSV
//!     ▲                              │
//!     └──── peek_message ◄───────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Market data state with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::chart::{ChartBook, ChartError, ChartRequest, ChartSubscription};
pub use domain::streaming::Symbol;

// Application
pub use application::services::{ExportError, ExportJob, ExportSummary, Exporter, Progress};

// Infrastructure config
pub use infrastructure::config::{ClientConfig, ConfigError, DEFAULT_MARKET_URL};

// Client
pub use infrastructure::shinny::{CallError, ClientError, ConnectionState, MarketClient};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
