//! Market Sync Binary
//!
//! Exports time-aligned bars or ticks for one or more symbols from a DIFF
//! market data front into a CSV file.
//!
//! # Usage
//!
//! ```bash
//! market-sync --symbols SHFE.cu2001,SHFE.rb2001 --duration 1m \
//!     --start "2019-12-02 09:00:00" --end "2019-12-02 15:00:00" \
//!     --output cu_rb.csv
//! ```
//!
//! # Environment Variables
//!
//! - `MARKET_SYNC_URL`: market data front (default: the public Shinny front)
//! - `MARKET_SYNC_RECONNECT_INTERVAL_MS`: wait between attempts (default: 3000)
//! - `MARKET_SYNC_MAX_RECONNECT_ATTEMPTS`: attempts before giving up (default: 3)
//! - `MARKET_SYNC_RECONNECT_RESET_ON_OPEN`: reset attempts after an open (default: false)
//! - `MARKET_SYNC_HEARTBEAT_TIMEOUT_MS`: silence before dropping the socket (default: 11000)
//! - `MARKET_SYNC_VIEW_WIDTH`: bars per window (default: 2000)
//! - `MARKET_SYNC_METRICS_PORT`: Prometheus port, 0 to disable the listener (default: 0)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log level (default: info)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use clap::Parser;
use market_sync::application::services::{ExportJob, Exporter};
use market_sync::domain::duration;
use market_sync::infrastructure::export::CsvFileSink;
use market_sync::infrastructure::shinny::MarketClient;
use market_sync::infrastructure::telemetry;
use market_sync::infrastructure::transport::WebSocketConnector;
use market_sync::{ClientConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// How long to wait for the socket to close after the export.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Export aligned market data series to CSV.
#[derive(Debug, Parser)]
#[command(name = "market-sync", version, about)]
struct Cli {
    /// Symbols, primary first (comma-separated).
    #[arg(long, value_delimiter = ',', required = true)]
    symbols: Vec<String>,

    /// Bar duration (`1m`, `5m`, `1h`, `1d`), or `0` for ticks.
    #[arg(long, value_parser = parse_duration)]
    duration: i64,

    /// First datetime, UTC (`YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` or RFC 3339).
    #[arg(long, value_parser = parse_datetime)]
    start: i64,

    /// Last datetime, inclusive, in the same formats as `--start`.
    #[arg(long, value_parser = parse_datetime)]
    end: i64,

    /// CSV file to append to.
    #[arg(long)]
    output: PathBuf,

    /// Market data front URL (overrides `MARKET_SYNC_URL`).
    #[arg(long)]
    url: Option<String>,

    /// Bars per window (overrides `MARKET_SYNC_VIEW_WIDTH`).
    #[arg(long)]
    view_width: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    let mut config = ClientConfig::from_env()?;
    if let Some(url) = cli.url {
        config = config.with_url(url);
    }
    init_metrics(config.metrics_port)?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let client = MarketClient::start(
        &config,
        Arc::new(WebSocketConnector::new()),
        shutdown_token.clone(),
    );

    let job = ExportJob::new(cli.symbols, cli.duration, cli.start, cli.end)
        .with_view_width(cli.view_width.unwrap_or(config.view_width));
    let exporter = Exporter::new(client.clone(), job)?;
    let mut sink = CsvFileSink::open(&cli.output)
        .with_context(|| format!("cannot open {}", cli.output.display()))?;

    let mut progress = exporter.progress();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let current = *progress.borrow();
            tracing::info!(percent = current.percent, "Export progress");
        }
    });

    let result = tokio::select! {
        result = exporter.run(&mut sink) => result.map_err(anyhow::Error::from),
        () = await_shutdown_signal() => {
            if let Err(e) = client.release_chart(exporter.chart_id()) {
                tracing::warn!(error = %e, "Failed to release chart");
            }
            Err(anyhow!("export interrupted"))
        }
    };

    client.close();
    wait_for_close(&client).await;
    shutdown_token.cancel();

    let summary = result?;
    tracing::info!(
        rows = summary.rows,
        windows = summary.windows,
        output = %cli.output.display(),
        "Export complete"
    );
    Ok(())
}

fn parse_duration(label: &str) -> Result<i64, String> {
    duration::parse(label).map_err(|e| e.to_string())
}

fn parse_datetime(text: &str) -> Result<i64, String> {
    let text = text.trim();
    let datetime = DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.naive_utc())
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| format!("unrecognized datetime: {text}"))?;

    datetime
        .and_utc()
        .timestamp_nanos_opt()
        .ok_or_else(|| format!("datetime out of range: {text}"))
}

/// Give the connection task a moment to flush the release and close.
async fn wait_for_close(client: &MarketClient) {
    let mut updates = client.updates();
    let closed = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        while !client.is_stopped() {
            if updates.changed().await.is_err() {
                break;
            }
        }
    })
    .await;
    if closed.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Connection did not close in time"
        );
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        url = %config.url,
        reconnect_interval_ms = u64::try_from(config.reconnect_interval.as_millis()).unwrap_or(u64::MAX),
        max_reconnect_attempts = config.max_reconnect_attempts,
        reconnect_reset_on_open = config.reconnect_reset_on_open,
        heartbeat_timeout_ms = u64::try_from(config.heartbeat_timeout.as_millis()).unwrap_or(u64::MAX),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
}

/// Wait for SIGINT or SIGTERM.
async fn await_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, stopping export");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, stopping export");
        }
    }
}
