//! Multi-Symbol Alignment
//!
//! Walks the primary symbol's ids through a ready window and lines up the
//! secondary symbols through the primary series' binding tables.
//!
//! # Row Shape
//!
//! ```text
//! datetime, A.open, A.high, ..., B.open, B.high, ...
//! ```
//!
//! A secondary without a binding for the current primary id, or whose bound
//! record is missing, contributes [`MISSING`] for every column. The same
//! sentinel fills any individual field a record does not carry.

use chrono::{DateTime, Utc};

use crate::domain::chart::{Record, Series, SeriesKind};
use crate::domain::streaming::Symbol;

/// Cell value for data that is not available.
pub const MISSING: &str = "#N/A";

/// Output datetime format (UTC, nanosecond precision).
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Format a nanosecond timestamp for output.
#[must_use]
pub fn format_datetime(nanos: i64) -> String {
    let datetime: DateTime<Utc> = DateTime::from_timestamp_nanos(nanos);
    datetime.format(DATETIME_FORMAT).to_string()
}

/// Column layout of an aligned export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowLayout {
    symbols: Vec<Symbol>,
    kind: SeriesKind,
}

impl RowLayout {
    /// Layout for `symbols` (primary first).
    #[must_use]
    pub const fn new(symbols: Vec<Symbol>, kind: SeriesKind) -> Self {
        Self { symbols, kind }
    }

    /// Symbols, primary first.
    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Header row: `datetime` then `symbol.column` for every symbol.
    #[must_use]
    pub fn header(&self) -> Vec<String> {
        let columns = self.kind.columns();
        let mut header = Vec::with_capacity(self.width());
        header.push("datetime".to_string());
        for symbol in &self.symbols {
            header.extend(columns.iter().map(|column| format!("{symbol}.{column}")));
        }
        header
    }

    /// Number of cells per row, datetime included.
    #[must_use]
    pub fn width(&self) -> usize {
        1 + self.symbols.len() * self.kind.columns().len()
    }

    fn push_record(&self, row: &mut Vec<String>, record: Option<&Record>) {
        for column in self.kind.columns() {
            let cell = record
                .and_then(|r| r.column(column))
                .map_or_else(|| MISSING.to_string(), |value| value.normalize().to_string());
            row.push(cell);
        }
    }
}

/// One aligned output row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedRow {
    /// Primary record id.
    pub id: i64,
    /// Primary datetime, nanoseconds.
    pub datetime: i64,
    /// Cells, datetime first.
    pub cells: Vec<String>,
}

/// How a walk over one window ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOutcome {
    /// Walked past the right bound; continue from `next_id` in a new window.
    Paginate {
        /// First id of the next window.
        next_id: i64,
    },
    /// Reached the end boundary or the end of the data.
    Finished,
}

/// Result of walking one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowWalk {
    /// Rows produced, ascending by id.
    pub rows: Vec<AlignedRow>,
    /// Why the walk stopped.
    pub outcome: WalkOutcome,
}

/// Position of an export walk across windows.
#[derive(Debug, Clone)]
pub struct AlignCursor {
    layout: RowLayout,
    end: i64,
    next_id: Option<i64>,
}

impl AlignCursor {
    /// Create a cursor that stops after datetime `end` (nanoseconds).
    #[must_use]
    pub const fn new(layout: RowLayout, end: i64) -> Self {
        Self {
            layout,
            end,
            next_id: None,
        }
    }

    /// Row layout.
    #[must_use]
    pub const fn layout(&self) -> &RowLayout {
        &self.layout
    }

    /// Next primary id to emit, once the first window was seen.
    #[must_use]
    pub const fn next_id(&self) -> Option<i64> {
        self.next_id
    }

    /// Walk one ready window `[left, right]`.
    ///
    /// `secondaries` holds the series of every non-primary symbol, in layout
    /// order; `None` when nothing was received for that symbol.
    pub fn walk(
        &mut self,
        bounds: (i64, i64),
        primary: &Series,
        secondaries: &[Option<&Series>],
    ) -> WindowWalk {
        let (left, right) = bounds;
        // Ids below the window's left bound are never emitted, even if still cached.
        let mut cursor = self.next_id.map_or(left.max(0), |next| next.max(left));
        self.next_id = Some(cursor);
        let mut rows = Vec::new();

        // A window ending before the cursor has nothing left to give.
        if cursor > right {
            return self.finish(rows, cursor);
        }

        while cursor <= right {
            let Some((record, datetime)) = primary
                .get(cursor)
                .and_then(|record| record.datetime.filter(|&dt| dt != 0).map(|dt| (record, dt)))
            else {
                return self.finish(rows, cursor);
            };
            if datetime > self.end {
                return self.finish(rows, cursor);
            }

            let mut cells = Vec::with_capacity(self.layout.width());
            cells.push(format_datetime(datetime));
            self.layout.push_record(&mut cells, Some(record));

            for (symbol, &series) in self.layout.symbols.iter().skip(1).zip(secondaries) {
                let bound = primary
                    .binding(symbol)
                    .and_then(|table| table.resolve(cursor))
                    .and_then(|secondary_id| series.and_then(|s| s.get(secondary_id)));
                self.layout.push_record(&mut cells, bound);
            }

            rows.push(AlignedRow {
                id: cursor,
                datetime,
                cells,
            });
            cursor += 1;
        }

        self.next_id = Some(cursor);
        WindowWalk {
            rows,
            outcome: WalkOutcome::Paginate { next_id: cursor },
        }
    }

    fn finish(&mut self, rows: Vec<AlignedRow>, cursor: i64) -> WindowWalk {
        self.next_id = Some(cursor);
        WindowWalk {
            rows,
            outcome: WalkOutcome::Finished,
        }
    }
}
