//! Export Service
//!
//! Drives a multi-symbol export: subscribe a chart positioned at the start
//! datetime, walk each final window with an [`AlignCursor`], write the rows,
//! then reissue the chart from the next id until the end datetime or the end
//! of the data is reached.
//!
//! The header is written once, before the first row. The sink is flushed
//! after every window. The chart is released however the export ends.

use tokio::sync::watch;

use crate::application::ports::{ChartFeed, FeedError, FeedLiveness, RowSink, SinkError};
use crate::domain::align::{AlignCursor, RowLayout, WalkOutcome, WindowWalk};
use crate::domain::chart::{ChartBook, ChartError, ChartRequest, ChartSubscription, DEFAULT_VIEW_WIDTH, Series};
use crate::domain::streaming::Symbol;

/// Export errors.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The start datetime is after the end datetime.
    #[error("invalid export range: start {start} is after end {end}")]
    InvalidRange {
        /// Start, nanoseconds.
        start: i64,
        /// End, nanoseconds.
        end: i64,
    },

    /// The chart request is invalid.
    #[error(transparent)]
    Chart(#[from] ChartError),

    /// The feed refused a request.
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// Writing rows failed.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// The connection died before the export finished.
    #[error("connection exhausted during export")]
    ConnectionExhausted,

    /// The client was closed before the export finished.
    #[error("connection closed during export")]
    ConnectionClosed,
}

/// What to export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportJob {
    /// Symbols, primary first.
    pub symbols: Vec<Symbol>,
    /// Bar duration in nanoseconds (0 = ticks).
    pub duration_nanos: i64,
    /// First datetime, nanoseconds.
    pub start: i64,
    /// Last datetime (inclusive), nanoseconds.
    pub end: i64,
    /// Window size requested per page.
    pub view_width: u32,
}

impl ExportJob {
    /// Create a job with the default window size.
    #[must_use]
    pub const fn new(symbols: Vec<Symbol>, duration_nanos: i64, start: i64, end: i64) -> Self {
        Self {
            symbols,
            duration_nanos,
            start,
            end,
            view_width: DEFAULT_VIEW_WIDTH,
        }
    }

    /// Override the window size.
    #[must_use]
    pub const fn with_view_width(mut self, view_width: u32) -> Self {
        self.view_width = view_width;
        self
    }
}

/// Export progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Percent of `[start, end]` covered by the last exported row.
    pub percent: u8,
    /// Set once the export completed successfully.
    pub finished: bool,
}

/// Totals of a finished export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Rows written.
    pub rows: u64,
    /// Windows walked.
    pub windows: u32,
}

/// Runs one export job against a chart feed.
#[derive(Debug)]
pub struct Exporter<F> {
    feed: F,
    job: ExportJob,
    request: ChartRequest,
    progress: watch::Sender<Progress>,
}

impl<F: ChartFeed> Exporter<F> {
    /// Validate the job and prepare its chart request.
    ///
    /// # Errors
    ///
    /// Returns an error for an inverted range or an invalid request (no
    /// symbols, or a tick export over several symbols).
    pub fn new(feed: F, job: ExportJob) -> Result<Self, ExportError> {
        if job.start > job.end {
            return Err(ExportError::InvalidRange {
                start: job.start,
                end: job.end,
            });
        }
        let request = ChartRequest::for_export(
            job.symbols.clone(),
            job.duration_nanos,
            job.start,
            job.view_width,
        );
        request.subscription()?;

        let (progress, _) = watch::channel(Progress::default());
        Ok(Self {
            feed,
            job,
            request,
            progress,
        })
    }

    /// Chart id used by this export.
    #[must_use]
    pub fn chart_id(&self) -> &str {
        &self.request.chart_id
    }

    /// Receiver of progress updates.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// Check if the export completed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.progress.borrow().finished
    }

    /// Run the export into `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error if the feed refuses a request, the sink fails, or
    /// the connection goes away before the end is reached.
    pub async fn run<S: RowSink + ?Sized>(&self, sink: &mut S) -> Result<ExportSummary, ExportError> {
        tracing::info!(
            chart_id = %self.request.chart_id,
            symbols = ?self.job.symbols,
            duration = self.job.duration_nanos,
            "Starting export"
        );
        let result = self.export(sink).await;

        if let Err(e) = self.feed.release_chart(&self.request.chart_id) {
            tracing::warn!(chart_id = %self.request.chart_id, error = %e, "Failed to release chart");
        }

        match &result {
            Ok(summary) => {
                self.progress.send_replace(Progress {
                    percent: 100,
                    finished: true,
                });
                tracing::info!(rows = summary.rows, windows = summary.windows, "Export finished");
            }
            Err(e) => tracing::error!(error = %e, "Export failed"),
        }
        result
    }

    async fn export<S: RowSink + ?Sized>(&self, sink: &mut S) -> Result<ExportSummary, ExportError> {
        let mut updates = self.feed.updates();
        let mut request = self.request.clone();
        let mut subscription = self.feed.set_chart(request.clone())?;
        let layout = RowLayout::new(self.job.symbols.clone(), subscription.kind());
        let mut cursor = AlignCursor::new(layout, self.job.end);
        let mut summary = ExportSummary::default();
        let mut header_written = false;

        loop {
            let walk = self
                .feed
                .with_charts(|book| walk_final_window(book, &subscription, &mut cursor));
            let Some(walk) = walk else {
                match self.feed.liveness() {
                    FeedLiveness::Live => {}
                    FeedLiveness::Exhausted => return Err(ExportError::ConnectionExhausted),
                    FeedLiveness::Closed => return Err(ExportError::ConnectionClosed),
                }
                if updates.changed().await.is_err() {
                    return Err(ExportError::ConnectionClosed);
                }
                continue;
            };

            summary.windows += 1;
            if !walk.rows.is_empty() && !header_written {
                sink.write_header(&cursor.layout().header())?;
                header_written = true;
            }
            for row in &walk.rows {
                sink.write_row(&row.cells)?;
            }
            sink.flush()?;
            summary.rows += walk.rows.len() as u64;
            if let Some(last) = walk.rows.last() {
                self.report(last.datetime);
            }
            self.feed.mark_exhausted(&subscription.chart_id);

            match walk.outcome {
                WalkOutcome::Finished => return Ok(summary),
                WalkOutcome::Paginate { next_id } => {
                    tracing::debug!(chart_id = %subscription.chart_id, next_id, "Requesting next window");
                    request = request.paginate(next_id);
                    subscription = self.feed.set_chart(request.clone())?;
                }
            }
        }
    }

    fn report(&self, datetime: i64) {
        let percent = progress_percent(self.job.start, self.job.end, datetime);
        self.progress.send_if_modified(|progress| {
            let changed = progress.percent != percent;
            progress.percent = percent;
            changed
        });
    }
}

/// Walk the subscription's window if it is final; `None` otherwise.
fn walk_final_window(
    book: &ChartBook,
    subscription: &ChartSubscription,
    cursor: &mut AlignCursor,
) -> Option<WindowWalk> {
    let window = book.window(&subscription.chart_id)?;
    if !window.is_final() {
        return None;
    }
    let bounds = window.state().bounds()?;
    let primary = book.series(subscription.primary()?, subscription.duration_nanos)?;
    let secondaries: Vec<Option<&Series>> = subscription
        .symbols
        .iter()
        .skip(1)
        .map(|symbol| book.series(symbol, subscription.duration_nanos))
        .collect();
    Some(cursor.walk(bounds, primary, &secondaries))
}

fn progress_percent(start: i64, end: i64, datetime: i64) -> u8 {
    if end <= start {
        return 100;
    }
    let covered = i128::from(datetime) - i128::from(start);
    let span = i128::from(end) - i128::from(start);
    u8::try_from((covered * 100 / span).clamp(0, 100)).unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::application::ports::MemorySink;
    use crate::domain::align::MISSING;
    use crate::domain::duration::MINUTE_NANOS;
    use crate::domain::streaming::DataFragment;

    struct FeedInner {
        book: Mutex<ChartBook>,
        requests: mpsc::UnboundedSender<ChartRequest>,
        released: Mutex<Vec<String>>,
        updates: watch::Sender<u64>,
        liveness: Mutex<FeedLiveness>,
    }

    #[derive(Clone)]
    struct FakeFeed(Arc<FeedInner>);

    impl FakeFeed {
        fn new() -> (Self, mpsc::UnboundedReceiver<ChartRequest>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let (updates, _) = watch::channel(0);
            let feed = Self(Arc::new(FeedInner {
                book: Mutex::new(ChartBook::new()),
                requests: tx,
                released: Mutex::new(Vec::new()),
                updates,
                liveness: Mutex::new(FeedLiveness::Live),
            }));
            (feed, rx)
        }

        fn push(&self, value: serde_json::Value) {
            let fragment: DataFragment = serde_json::from_value(value).unwrap();
            self.0.book.lock().apply(&fragment);
            self.0.updates.send_modify(|tick| *tick += 1);
        }

        fn set_liveness(&self, liveness: FeedLiveness) {
            *self.0.liveness.lock() = liveness;
            self.0.updates.send_modify(|tick| *tick += 1);
        }
    }

    impl ChartFeed for FakeFeed {
        fn set_chart(&self, request: ChartRequest) -> Result<ChartSubscription, FeedError> {
            let subscription = request.subscription()?;
            self.0.book.lock().subscribe(subscription.clone());
            self.0.requests.send(request).unwrap();
            Ok(subscription)
        }

        fn release_chart(&self, chart_id: &str) -> Result<bool, FeedError> {
            self.0.book.lock().release(chart_id);
            self.0.released.lock().push(chart_id.to_string());
            Ok(true)
        }

        fn mark_exhausted(&self, chart_id: &str) {
            if let Some(window) = self.0.book.lock().window_mut(chart_id) {
                window.mark_exhausted();
            }
        }

        fn with_charts<R>(&self, f: impl FnOnce(&ChartBook) -> R) -> R {
            f(&self.0.book.lock())
        }

        fn updates(&self) -> watch::Receiver<u64> {
            self.0.updates.subscribe()
        }

        fn liveness(&self) -> FeedLiveness {
            *self.0.liveness.lock()
        }
    }

    fn bars(ids: std::ops::RangeInclusive<i64>) -> serde_json::Value {
        ids.map(|id| {
            (
                id.to_string(),
                json!({"datetime": (id + 1) * MINUTE_NANOS, "open": id, "close": id}),
            )
        })
        .collect::<serde_json::Map<_, _>>()
        .into()
    }

    fn ack(request: &ChartRequest, left: i64, right: i64) -> serde_json::Value {
        let fields = request.subscription().unwrap().requested_fields;
        json!({
            "charts": {request.chart_id.clone(): {"left_id": left, "right_id": right, "state": fields}},
            "mdhis_more_data": false
        })
    }

    async fn next_request(rx: &mut mpsc::UnboundedReceiver<ChartRequest>) -> ChartRequest {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn exports_across_windows_and_releases_chart() {
        let (feed, mut requests) = FakeFeed::new();
        let job = ExportJob::new(vec!["X".into(), "Y".into()], MINUTE_NANOS, MINUTE_NANOS, 5 * MINUTE_NANOS)
            .with_view_width(3);
        let exporter = Arc::new(Exporter::new(feed.clone(), job).unwrap());
        let chart_id = exporter.chart_id().to_string();
        assert!(chart_id.starts_with("PYSDK_downloader_"));

        let task = {
            let exporter = Arc::clone(&exporter);
            tokio::spawn(async move {
                let mut sink = MemorySink::default();
                let result = exporter.run(&mut sink).await;
                (result, sink)
            })
        };

        let first = next_request(&mut requests).await;
        assert_eq!(first.focus_datetime, Some(MINUTE_NANOS));
        feed.push(json!({
            "klines": {
                "X": {MINUTE_NANOS.to_string(): {
                    "last_id": 9,
                    "data": bars(0..=2),
                    "binding": {"Y": {"0": 10, "1": 11}}
                }},
                "Y": {MINUTE_NANOS.to_string(): {"last_id": 11, "data": bars(10..=11)}}
            }
        }));
        feed.push(ack(&first, 0, 2));

        let second = next_request(&mut requests).await;
        assert_eq!(second.left_kline_id, Some(3));
        assert_eq!(second.focus_datetime, None);
        feed.push(json!({
            "klines": {"X": {MINUTE_NANOS.to_string(): {"last_id": 9, "data": bars(3..=6)}}}
        }));
        feed.push(ack(&second, 3, 6));

        let (result, sink) = task.await.unwrap();
        let summary = result.unwrap();
        assert_eq!(summary.rows, 5);
        assert_eq!(summary.windows, 2);

        let header = sink.header.unwrap();
        assert_eq!(header[0], "datetime");
        assert_eq!(header.len(), 15);
        let ids: Vec<&str> = sink.rows.iter().map(|row| row[1].as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
        assert_eq!(sink.rows[0][8], "10");
        assert!(sink.rows[2][8..].iter().all(|cell| cell == MISSING));
        assert_eq!(sink.flushes, 2);

        assert!(exporter.is_finished());
        assert_eq!(*exporter.progress().borrow(), Progress { percent: 100, finished: true });
        assert_eq!(*feed.0.released.lock(), vec![chart_id]);
    }

    #[tokio::test]
    async fn exhausted_connection_fails_and_releases() {
        let (feed, mut requests) = FakeFeed::new();
        let job = ExportJob::new(vec!["X".into()], MINUTE_NANOS, 0, MINUTE_NANOS);
        let exporter = Arc::new(Exporter::new(feed.clone(), job).unwrap());

        let task = {
            let exporter = Arc::clone(&exporter);
            tokio::spawn(async move {
                let mut sink = MemorySink::default();
                exporter.run(&mut sink).await
            })
        };

        next_request(&mut requests).await;
        feed.set_liveness(FeedLiveness::Exhausted);

        let result = task.await.unwrap();
        assert!(matches!(result, Err(ExportError::ConnectionExhausted)));
        assert!(!exporter.is_finished());
        assert_eq!(feed.0.released.lock().len(), 1);
    }

    #[test]
    fn invalid_jobs_fail_synchronously() {
        let (feed, _requests) = FakeFeed::new();
        let ticks = ExportJob::new(vec!["A".into(), "B".into()], 0, 0, 1);
        assert!(matches!(
            Exporter::new(feed.clone(), ticks),
            Err(ExportError::Chart(ChartError::UnsupportedMultiSymbol(2)))
        ));

        let inverted = ExportJob::new(vec!["A".into()], MINUTE_NANOS, 10, 1);
        assert!(matches!(
            Exporter::new(feed, inverted),
            Err(ExportError::InvalidRange { start: 10, end: 1 })
        ));
    }

    #[test]
    fn progress_is_floored_percent_of_range() {
        assert_eq!(progress_percent(0, 200, 0), 0);
        assert_eq!(progress_percent(0, 200, 99), 49);
        assert_eq!(progress_percent(0, 200, 500), 100);
        assert_eq!(progress_percent(5, 5, 5), 100);
    }
}
