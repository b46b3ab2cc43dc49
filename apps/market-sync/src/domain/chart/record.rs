//! Bar and tick records accumulated from fragment patches.

use rust_decimal::Decimal;

use crate::domain::streaming::{BarPatch, Symbol, TickPatch};

/// Output columns of a bar series, in export order.
pub const BAR_COLUMNS: &[&str] = &[
    "open", "high", "low", "close", "volume", "open_oi", "close_oi",
];

/// Output columns of a tick series, in export order.
pub const TICK_COLUMNS: &[&str] = &[
    "last_price",
    "highest",
    "lowest",
    "bid_price1",
    "bid_volume1",
    "ask_price1",
    "ask_volume1",
    "volume",
    "amount",
    "open_interest",
];

/// Whether a series holds bars or ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesKind {
    /// Kline series (duration > 0).
    Bar,
    /// Tick series (duration == 0).
    Tick,
}

impl SeriesKind {
    /// Series kind for a duration in nanoseconds.
    #[must_use]
    pub const fn from_duration(duration_nanos: i64) -> Self {
        if duration_nanos == 0 { Self::Tick } else { Self::Bar }
    }

    /// Export columns for this kind.
    #[must_use]
    pub const fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Bar => BAR_COLUMNS,
            Self::Tick => TICK_COLUMNS,
        }
    }
}

/// Overwrite every field the patch carries.
macro_rules! merge_present {
    ($target:expr, $patch:expr, $($field:ident),+ $(,)?) => {
        $(
            if $patch.$field.is_some() {
                $target.$field = $patch.$field;
            }
        )+
    };
}

/// Accumulated bar fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BarFields {
    /// Open price.
    pub open: Option<Decimal>,
    /// High price.
    pub high: Option<Decimal>,
    /// Low price.
    pub low: Option<Decimal>,
    /// Close price.
    pub close: Option<Decimal>,
    /// Traded volume.
    pub volume: Option<Decimal>,
    /// Open interest at bar start.
    pub open_oi: Option<Decimal>,
    /// Open interest at bar end.
    pub close_oi: Option<Decimal>,
}

impl BarFields {
    fn apply(&mut self, patch: &BarPatch) {
        merge_present!(self, patch, open, high, low, close, volume, open_oi, close_oi);
    }

    fn column(&self, name: &str) -> Option<Decimal> {
        match name {
            "open" => self.open,
            "high" => self.high,
            "low" => self.low,
            "close" => self.close,
            "volume" => self.volume,
            "open_oi" => self.open_oi,
            "close_oi" => self.close_oi,
            _ => None,
        }
    }
}

/// Accumulated tick fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickFields {
    /// Last traded price.
    pub last_price: Option<Decimal>,
    /// Session high.
    pub highest: Option<Decimal>,
    /// Session low.
    pub lowest: Option<Decimal>,
    /// Best bid.
    pub bid_price1: Option<Decimal>,
    /// Best bid size.
    pub bid_volume1: Option<Decimal>,
    /// Best ask.
    pub ask_price1: Option<Decimal>,
    /// Best ask size.
    pub ask_volume1: Option<Decimal>,
    /// Cumulative volume.
    pub volume: Option<Decimal>,
    /// Cumulative turnover.
    pub amount: Option<Decimal>,
    /// Open interest.
    pub open_interest: Option<Decimal>,
}

impl TickFields {
    fn apply(&mut self, patch: &TickPatch) {
        merge_present!(
            self,
            patch,
            last_price,
            highest,
            lowest,
            bid_price1,
            bid_volume1,
            ask_price1,
            ask_volume1,
            volume,
            amount,
            open_interest,
        );
    }

    fn column(&self, name: &str) -> Option<Decimal> {
        match name {
            "last_price" => self.last_price,
            "highest" => self.highest,
            "lowest" => self.lowest,
            "bid_price1" => self.bid_price1,
            "bid_volume1" => self.bid_volume1,
            "ask_price1" => self.ask_price1,
            "ask_volume1" => self.ask_volume1,
            "volume" => self.volume,
            "amount" => self.amount,
            "open_interest" => self.open_interest,
            _ => None,
        }
    }
}

/// Bar or tick payload of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFields {
    /// Bar fields.
    Bar(BarFields),
    /// Tick fields.
    Tick(TickFields),
}

/// One bar or tick of a series.
///
/// The id is assigned by the server and stays stable for the lifetime of the
/// chart; later patches for the same id refine fields in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Series-local id.
    pub id: i64,
    /// Symbol the record belongs to.
    pub symbol: Symbol,
    /// Nanoseconds since epoch, once received.
    pub datetime: Option<i64>,
    /// Bar or tick fields.
    pub fields: RecordFields,
}

impl Record {
    /// Create an empty bar record.
    #[must_use]
    pub fn bar(id: i64, symbol: impl Into<Symbol>) -> Self {
        Self {
            id,
            symbol: symbol.into(),
            datetime: None,
            fields: RecordFields::Bar(BarFields::default()),
        }
    }

    /// Create an empty tick record.
    #[must_use]
    pub fn tick(id: i64, symbol: impl Into<Symbol>) -> Self {
        Self {
            id,
            symbol: symbol.into(),
            datetime: None,
            fields: RecordFields::Tick(TickFields::default()),
        }
    }

    /// Series kind of this record.
    #[must_use]
    pub const fn kind(&self) -> SeriesKind {
        match self.fields {
            RecordFields::Bar(_) => SeriesKind::Bar,
            RecordFields::Tick(_) => SeriesKind::Tick,
        }
    }

    /// Datetime in milliseconds since epoch.
    #[must_use]
    pub const fn datetime_millis(&self) -> Option<i64> {
        match self.datetime {
            Some(nanos) => Some(nanos / 1_000_000),
            None => None,
        }
    }

    /// Merge a bar patch. Ignored for tick records.
    pub fn apply_bar(&mut self, patch: &BarPatch) {
        if let RecordFields::Bar(fields) = &mut self.fields {
            if patch.datetime.is_some() {
                self.datetime = patch.datetime;
            }
            fields.apply(patch);
        }
    }

    /// Merge a tick patch. Ignored for bar records.
    pub fn apply_tick(&mut self, patch: &TickPatch) {
        if let RecordFields::Tick(fields) = &mut self.fields {
            if patch.datetime.is_some() {
                self.datetime = patch.datetime;
            }
            fields.apply(patch);
        }
    }

    /// Look up an export column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<Decimal> {
        match &self.fields {
            RecordFields::Bar(fields) => fields.column(name),
            RecordFields::Tick(fields) => fields.column(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar_patch(close: i64) -> BarPatch {
        BarPatch {
            datetime: Some(1_000_000_000),
            close: Some(Decimal::new(close, 0)),
            ..BarPatch::default()
        }
    }

    #[test]
    fn patches_refine_fields_in_place() {
        let mut record = Record::bar(3, "A");
        record.apply_bar(&BarPatch {
            open: Some(Decimal::new(10, 0)),
            ..BarPatch::default()
        });
        record.apply_bar(&bar_patch(12));

        assert_eq!(record.column("open"), Some(Decimal::new(10, 0)));
        assert_eq!(record.column("close"), Some(Decimal::new(12, 0)));
        assert_eq!(record.datetime, Some(1_000_000_000));
        assert_eq!(record.datetime_millis(), Some(1_000));
    }

    #[test]
    fn reapplying_a_patch_is_idempotent() {
        let mut once = Record::bar(1, "A");
        once.apply_bar(&bar_patch(5));
        let mut twice = once.clone();
        twice.apply_bar(&bar_patch(5));
        assert_eq!(once, twice);
    }

    #[test]
    fn tick_patch_ignored_on_bar_record() {
        let mut record = Record::bar(1, "A");
        record.apply_tick(&TickPatch {
            datetime: Some(7),
            ..TickPatch::default()
        });
        assert_eq!(record.datetime, None);
    }

    #[test]
    fn columns_follow_series_kind() {
        assert_eq!(SeriesKind::from_duration(0), SeriesKind::Tick);
        assert_eq!(SeriesKind::from_duration(60), SeriesKind::Bar);
        assert_eq!(SeriesKind::Bar.columns().len(), 7);
        assert_eq!(SeriesKind::Tick.columns()[0], "last_price");
        assert_eq!(Record::tick(1, "A").column("open"), None);
    }
}
