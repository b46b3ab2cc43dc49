//! Chart subscription requests.
//!
//! A [`ChartRequest`] is the `set_chart` message the client sends. Validating
//! it yields a [`ChartSubscription`], which remembers every field the client
//! asked for so the completeness gate can tell when the server has applied
//! the request.

use std::collections::BTreeMap;

use rand::Rng;
use serde::Serialize;
use serde_json::Value;

use super::record::SeriesKind;
use crate::domain::duration::DAY_NANOS;
use crate::domain::streaming::Symbol;

/// Default number of bars the server keeps buffered per chart.
pub const DEFAULT_VIEW_WIDTH: u32 = 2000;

/// Prefix of generated export chart ids.
pub const EXPORT_CHART_PREFIX: &str = "PYSDK_downloader_";

const CHART_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Errors raised when building a chart subscription.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChartError {
    /// Tick series can only be requested for a single instrument.
    #[error("tick series does not support multiple symbols (got {0})")]
    UnsupportedMultiSymbol(usize),

    /// No symbols were given.
    #[error("chart request has no symbols")]
    NoSymbols,

    /// Request could not be serialized.
    #[error("invalid chart request: {0}")]
    InvalidRequest(String),
}

/// A `set_chart` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartRequest {
    /// Server correlation key.
    pub chart_id: String,
    /// Instruments, primary first.
    pub symbols: Vec<Symbol>,
    /// Bar duration in nanoseconds (0 = ticks).
    pub duration: i64,
    /// Number of bars to buffer.
    pub view_width: Option<u32>,
    /// Datetime (ns) the window should be positioned at.
    pub focus_datetime: Option<i64>,
    /// Position of the focus datetime within the window.
    pub focus_position: Option<i64>,
    /// Lower id cursor used when paginating.
    pub left_kline_id: Option<i64>,
    /// First trading day offset (ns).
    pub trading_day_start: Option<i64>,
    /// Trading day span (ns).
    pub trading_day_count: Option<i64>,
}

#[derive(Serialize)]
struct SetChartWire<'a> {
    aid: &'static str,
    chart_id: &'a str,
    ins_list: String,
    duration: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    view_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    focus_datetime: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    focus_position: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    left_kline_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trading_day_start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trading_day_count: Option<i64>,
}

impl ChartRequest {
    /// Create a request with no window positioning.
    #[must_use]
    pub fn new(chart_id: impl Into<String>, symbols: Vec<Symbol>, duration: i64) -> Self {
        Self {
            chart_id: chart_id.into(),
            symbols,
            duration,
            view_width: None,
            focus_datetime: None,
            focus_position: None,
            left_kline_id: None,
            trading_day_start: None,
            trading_day_count: None,
        }
    }

    /// Request the most recent `count` bars.
    #[must_use]
    pub const fn with_bar_count(mut self, count: u32) -> Self {
        self.view_width = Some(count);
        self
    }

    /// Request a range of trading days.
    ///
    /// `start_day` is relative to the current trading day (negative looks back).
    #[must_use]
    pub const fn with_trading_days(mut self, start_day: i64, day_count: i64) -> Self {
        self.trading_day_start = Some(start_day * DAY_NANOS);
        self.trading_day_count = Some(day_count * DAY_NANOS);
        self
    }

    /// Position the window so that `datetime` sits at `position`.
    #[must_use]
    pub const fn with_focus(mut self, datetime: i64, position: i64) -> Self {
        self.focus_datetime = Some(datetime);
        self.focus_position = Some(position);
        self
    }

    /// Request for the export walk: focus at `start`, `view_width` bars.
    #[must_use]
    pub fn for_export(symbols: Vec<Symbol>, duration: i64, start: i64, view_width: u32) -> Self {
        Self::new(generate_chart_id(), symbols, duration)
            .with_bar_count(view_width)
            .with_focus(start, 0)
    }

    /// Next page: drop the focus and continue from `next_id`.
    #[must_use]
    pub fn paginate(&self, next_id: i64) -> Self {
        Self {
            focus_datetime: None,
            focus_position: None,
            left_kline_id: Some(next_id),
            ..self.clone()
        }
    }

    /// Release request: same chart id with an empty instrument list.
    #[must_use]
    pub fn release(&self) -> Self {
        Self {
            chart_id: self.chart_id.clone(),
            symbols: Vec::new(),
            duration: self.duration,
            view_width: Some(self.view_width.unwrap_or(DEFAULT_VIEW_WIDTH)),
            focus_datetime: None,
            focus_position: None,
            left_kline_id: None,
            trading_day_start: None,
            trading_day_count: None,
        }
    }

    /// Check if this request releases the chart.
    #[must_use]
    pub fn is_release(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Series kind requested.
    #[must_use]
    pub const fn kind(&self) -> SeriesKind {
        SeriesKind::from_duration(self.duration)
    }

    /// The request as wire fields, keyed by name.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_fields(&self) -> Result<BTreeMap<String, Value>, ChartError> {
        let wire = SetChartWire {
            aid: "set_chart",
            chart_id: &self.chart_id,
            ins_list: self.symbols.join(","),
            duration: self.duration,
            view_width: self.view_width,
            focus_datetime: self.focus_datetime,
            focus_position: self.focus_position,
            left_kline_id: self.left_kline_id,
            trading_day_start: self.trading_day_start,
            trading_day_count: self.trading_day_count,
        };

        match serde_json::to_value(wire) {
            Ok(Value::Object(map)) => Ok(map.into_iter().collect()),
            Ok(other) => Err(ChartError::InvalidRequest(format!(
                "expected object, got {other}"
            ))),
            Err(e) => Err(ChartError::InvalidRequest(e.to_string())),
        }
    }

    /// Validate the request and build the subscription it creates.
    ///
    /// # Errors
    ///
    /// - [`ChartError::NoSymbols`] when the symbol list is empty.
    /// - [`ChartError::UnsupportedMultiSymbol`] for a tick series over more
    ///   than one symbol.
    pub fn subscription(&self) -> Result<ChartSubscription, ChartError> {
        if self.symbols.is_empty() {
            return Err(ChartError::NoSymbols);
        }
        if self.kind() == SeriesKind::Tick && self.symbols.len() != 1 {
            return Err(ChartError::UnsupportedMultiSymbol(self.symbols.len()));
        }

        Ok(ChartSubscription {
            chart_id: self.chart_id.clone(),
            symbols: self.symbols.clone(),
            duration_nanos: self.duration,
            requested_fields: self.to_fields()?,
        })
    }
}

/// A validated chart subscription.
///
/// Superseded, never mutated, when the request parameters change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartSubscription {
    /// Server correlation key.
    pub chart_id: String,
    /// Instruments, primary first.
    pub symbols: Vec<Symbol>,
    /// Bar duration in nanoseconds (0 = ticks).
    pub duration_nanos: i64,
    /// Fields the server must echo back before the chart state is trusted.
    pub requested_fields: BTreeMap<String, Value>,
}

impl ChartSubscription {
    /// Primary symbol (rows are walked along its ids); `None` without symbols.
    #[must_use]
    pub fn primary(&self) -> Option<&str> {
        self.symbols.first().map(String::as_str)
    }

    /// Series kind.
    #[must_use]
    pub const fn kind(&self) -> SeriesKind {
        SeriesKind::from_duration(self.duration_nanos)
    }

    /// Check if a series key belongs to this subscription.
    #[must_use]
    pub fn covers(&self, symbol: &str, duration_nanos: i64) -> bool {
        self.duration_nanos == duration_nanos && self.symbols.iter().any(|s| s == symbol)
    }
}

/// Generate a random export chart id.
#[must_use]
pub fn generate_chart_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..8)
        .map(|_| char::from(CHART_ID_ALPHABET[rng.random_range(0..CHART_ID_ALPHABET.len())]))
        .collect();
    format!("{EXPORT_CHART_PREFIX}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::duration::MINUTE_NANOS;

    #[test]
    fn tick_series_rejects_multiple_symbols() {
        let request = ChartRequest::new("c", vec!["A".into(), "B".into()], 0);
        assert_eq!(
            request.subscription(),
            Err(ChartError::UnsupportedMultiSymbol(2))
        );
    }

    #[test]
    fn empty_symbol_list_rejected() {
        let request = ChartRequest::new("c", vec![], MINUTE_NANOS);
        assert_eq!(request.subscription(), Err(ChartError::NoSymbols));
    }

    #[test]
    fn hand_built_subscription_without_symbols_has_no_primary() {
        let sub = ChartSubscription {
            chart_id: "c".into(),
            symbols: Vec::new(),
            duration_nanos: MINUTE_NANOS,
            requested_fields: BTreeMap::new(),
        };
        assert_eq!(sub.primary(), None);
    }

    #[test]
    fn bar_series_allows_multiple_symbols() {
        let request = ChartRequest::new("c", vec!["A".into(), "B".into()], MINUTE_NANOS);
        let sub = request.subscription().unwrap();
        assert_eq!(sub.primary(), Some("A"));
        assert!(sub.covers("B", MINUTE_NANOS));
        assert!(!sub.covers("B", 0));
        assert!(!sub.covers("C", MINUTE_NANOS));
    }

    #[test]
    fn requested_fields_mirror_wire_message() {
        let request = ChartRequest::new("c1", vec!["A".into(), "B".into()], MINUTE_NANOS)
            .with_bar_count(2000)
            .with_focus(5, 0);
        let fields = request.subscription().unwrap().requested_fields;

        assert_eq!(fields["aid"], "set_chart");
        assert_eq!(fields["chart_id"], "c1");
        assert_eq!(fields["ins_list"], "A,B");
        assert_eq!(fields["duration"], MINUTE_NANOS);
        assert_eq!(fields["view_width"], 2000);
        assert_eq!(fields["focus_datetime"], 5);
        assert_eq!(fields["focus_position"], 0);
        assert!(!fields.contains_key("left_kline_id"));
    }

    #[test]
    fn paginate_drops_focus() {
        let request = ChartRequest::new("c1", vec!["A".into()], MINUTE_NANOS)
            .with_bar_count(10)
            .with_focus(5, 0);
        let next = request.paginate(42);

        assert_eq!(next.chart_id, "c1");
        assert_eq!(next.left_kline_id, Some(42));
        assert_eq!(next.focus_datetime, None);
        assert_eq!(next.focus_position, None);
        assert_eq!(next.view_width, Some(10));
    }

    #[test]
    fn release_keeps_chart_id_and_clears_symbols() {
        let request = ChartRequest::new("c1", vec!["A".into()], MINUTE_NANOS).with_focus(5, 0);
        let release = request.release();
        assert!(release.is_release());
        let fields = release.to_fields().unwrap();
        assert_eq!(fields["ins_list"], "");
        assert_eq!(fields["chart_id"], "c1");
        assert_eq!(fields["view_width"], DEFAULT_VIEW_WIDTH);
        assert!(!fields.contains_key("focus_datetime"));
    }

    #[test]
    fn trading_days_convert_to_nanos() {
        let request = ChartRequest::new("c", vec!["A".into()], MINUTE_NANOS).with_trading_days(-2, 1);
        assert_eq!(request.trading_day_start, Some(-2 * DAY_NANOS));
        assert_eq!(request.trading_day_count, Some(DAY_NANOS));
    }

    #[test]
    fn generated_chart_ids() {
        let id = generate_chart_id();
        assert!(id.starts_with(EXPORT_CHART_PREFIX));
        assert_eq!(id.len(), EXPORT_CHART_PREFIX.len() + 8);
        assert!(id[EXPORT_CHART_PREFIX.len()..].chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
