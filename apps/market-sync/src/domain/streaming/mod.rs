//! Market Data Streaming Types
//!
//! Typed fragments of the server's mirrored data tree. Every `rtn_data`
//! notification carries a list of [`DataFragment`]s, each holding any subset
//! of `charts`, `klines`, `ticks`, `quotes` and `mdhis_more_data`. A fragment
//! is always a partial update: absent fields mean "unchanged".
//!
//! # Wire Shape
//!
//! ```json
//! {
//!   "charts": {"c1": {"left_id": 10, "right_id": 12, "state": {"aid": "set_chart", ...}}},
//!   "klines": {"SHFE.rb2010": {"60000000000": {"last_id": 13, "data": {"10": {...}}}}},
//!   "ticks": {"SHFE.rb2010": {"last_id": 99, "data": {"99": {...}}}},
//!   "quotes": {"SHFE.rb2010": {"last_price": 3650.0}},
//!   "mdhis_more_data": false
//! }
//! ```
//!
//! Numeric fields are decoded leniently: numbers and numeric strings become
//! [`Decimal`]s, anything else (`"NaN"`, `"-"`, `null`) is treated as absent.
//! `null` map entries are skipped rather than failing the whole frame.

use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// A symbol string (exchange-qualified instrument id, e.g. `SHFE.rb2010`).
pub type Symbol = String;

// =============================================================================
// Fragment Envelope
// =============================================================================

/// One partial update from an `rtn_data` notification.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataFragment {
    /// Chart state updates keyed by chart id.
    #[serde(default, deserialize_with = "map_skip_nulls")]
    pub charts: HashMap<String, ChartStateFragment>,

    /// Kline series keyed by symbol, then by duration in nanoseconds.
    #[serde(default, deserialize_with = "map_skip_nulls")]
    pub klines: HashMap<Symbol, KlineDurations>,

    /// Tick series keyed by symbol.
    #[serde(default, deserialize_with = "map_skip_nulls")]
    pub ticks: HashMap<Symbol, TickFragment>,

    /// Quote updates keyed by symbol.
    #[serde(default, deserialize_with = "map_skip_nulls")]
    pub quotes: HashMap<Symbol, QuoteFragment>,

    /// Global flag: more historical data is still being delivered.
    #[serde(default)]
    pub mdhis_more_data: Option<bool>,
}

impl DataFragment {
    /// Check if the fragment carries nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.charts.is_empty()
            && self.klines.is_empty()
            && self.ticks.is_empty()
            && self.quotes.is_empty()
            && self.mdhis_more_data.is_none()
    }
}

// =============================================================================
// Chart State
// =============================================================================

/// Partial update of a chart's server-side state.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChartStateFragment {
    /// Left bound of the buffered window.
    #[serde(default)]
    pub left_id: Option<i64>,

    /// Right bound of the buffered window.
    #[serde(default)]
    pub right_id: Option<i64>,

    /// Per-chart "more data" flag.
    #[serde(default)]
    pub more_data: Option<bool>,

    /// Server readiness flag.
    #[serde(default)]
    pub ready: Option<bool>,

    /// Echo of the request parameters the server has applied.
    #[serde(default)]
    pub state: Option<Map<String, Value>>,
}

// =============================================================================
// Kline Series
// =============================================================================

/// Kline series of one symbol keyed by duration (nanoseconds, as a string).
#[derive(Debug, Clone, Default)]
pub struct KlineDurations(pub HashMap<String, KlineFragment>);

impl<'de> Deserialize<'de> for KlineDurations {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        map_skip_nulls(deserializer).map(Self)
    }
}

/// Partial update of one kline series.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KlineFragment {
    /// Highest id the server holds for the series.
    #[serde(default)]
    pub last_id: Option<i64>,

    /// Bar patches keyed by id (as a string).
    #[serde(default, deserialize_with = "map_skip_nulls")]
    pub data: HashMap<String, BarPatch>,

    /// Alignment tables keyed by secondary symbol.
    #[serde(default, deserialize_with = "map_skip_nulls")]
    pub binding: HashMap<Symbol, BindingPatch>,
}

/// Partial id mapping (`primary id -> secondary id`) for one secondary symbol.
#[derive(Debug, Clone, Default)]
pub struct BindingPatch(pub HashMap<String, i64>);

impl<'de> Deserialize<'de> for BindingPatch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        map_skip_nulls(deserializer).map(Self)
    }
}

/// Partial bar fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BarPatch {
    /// Bar open time, nanoseconds since epoch.
    #[serde(default, deserialize_with = "lenient_i64")]
    pub datetime: Option<i64>,
    /// Open price.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub open: Option<Decimal>,
    /// High price.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub high: Option<Decimal>,
    /// Low price.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub low: Option<Decimal>,
    /// Close price.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub close: Option<Decimal>,
    /// Traded volume.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub volume: Option<Decimal>,
    /// Open interest at bar start.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub open_oi: Option<Decimal>,
    /// Open interest at bar end.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub close_oi: Option<Decimal>,
}

// =============================================================================
// Tick Series
// =============================================================================

/// Partial update of one tick series.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TickFragment {
    /// Highest id the server holds for the series.
    #[serde(default)]
    pub last_id: Option<i64>,

    /// Tick patches keyed by id (as a string).
    #[serde(default, deserialize_with = "map_skip_nulls")]
    pub data: HashMap<String, TickPatch>,
}

/// Partial tick fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TickPatch {
    /// Tick time, nanoseconds since epoch.
    #[serde(default, deserialize_with = "lenient_i64")]
    pub datetime: Option<i64>,
    /// Last traded price.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub last_price: Option<Decimal>,
    /// Session high.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub highest: Option<Decimal>,
    /// Session low.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub lowest: Option<Decimal>,
    /// Best bid.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub bid_price1: Option<Decimal>,
    /// Best bid size.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub bid_volume1: Option<Decimal>,
    /// Best ask.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub ask_price1: Option<Decimal>,
    /// Best ask size.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub ask_volume1: Option<Decimal>,
    /// Cumulative volume.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub volume: Option<Decimal>,
    /// Cumulative turnover.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub amount: Option<Decimal>,
    /// Open interest.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub open_interest: Option<Decimal>,
}

// =============================================================================
// Quotes
// =============================================================================

/// Partial quote fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuoteFragment {
    /// Exchange timestamp as sent by the server (`YYYY-MM-DD HH:MM:SS.ffffff`).
    #[serde(default)]
    pub datetime: Option<String>,
    /// Last traded price.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub last_price: Option<Decimal>,
    /// Best ask.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub ask_price1: Option<Decimal>,
    /// Best ask size.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub ask_volume1: Option<Decimal>,
    /// Best bid.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub bid_price1: Option<Decimal>,
    /// Best bid size.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub bid_volume1: Option<Decimal>,
    /// Session high.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub highest: Option<Decimal>,
    /// Session low.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub lowest: Option<Decimal>,
    /// Session open.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub open: Option<Decimal>,
    /// Session close.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub close: Option<Decimal>,
    /// Volume-weighted average price.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub average: Option<Decimal>,
    /// Cumulative volume.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub volume: Option<Decimal>,
    /// Cumulative turnover.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub amount: Option<Decimal>,
    /// Open interest.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub open_interest: Option<Decimal>,
    /// Previous close.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub pre_close: Option<Decimal>,
    /// Previous settlement.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub pre_settlement: Option<Decimal>,
    /// Settlement price.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub settlement: Option<Decimal>,
    /// Upper price limit.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub upper_limit: Option<Decimal>,
    /// Lower price limit.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub lower_limit: Option<Decimal>,
}

// =============================================================================
// Lenient Decoding
// =============================================================================

/// Convert a JSON value to a decimal, treating non-numeric values as absent.
#[must_use]
pub fn decimal_from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()
        }
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(decimal_from_json(&value))
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn map_skip_nulls<'de, D, T>(deserializer: D) -> Result<HashMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let raw: Option<HashMap<String, Option<T>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect())
}
