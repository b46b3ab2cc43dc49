//! Per-symbol record stores.
//!
//! A [`Series`] holds every record the server has pushed for one
//! `(symbol, duration)` pair, keyed by id. Records outside any chart's window
//! are kept here too; windows only decide what is visible.

use std::collections::{BTreeMap, HashMap};

use super::record::{Record, SeriesKind};
use crate::domain::streaming::{KlineFragment, Symbol, TickFragment};

/// Key of a series: symbol plus duration in nanoseconds (0 = ticks).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    /// Instrument.
    pub symbol: Symbol,
    /// Bar duration in nanoseconds.
    pub duration_nanos: i64,
}

impl SeriesKey {
    /// Create a series key.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, duration_nanos: i64) -> Self {
        Self {
            symbol: symbol.into(),
            duration_nanos,
        }
    }
}

/// Primary id to secondary id mapping for one secondary symbol.
///
/// A missing entry means the secondary has no aligned record for that
/// primary id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingTable {
    entries: BTreeMap<i64, i64>,
}

impl BindingTable {
    /// Resolve a primary id.
    #[must_use]
    pub fn resolve(&self, primary_id: i64) -> Option<i64> {
        self.entries.get(&primary_id).copied()
    }

    /// Insert or overwrite a mapping.
    pub fn bind(&mut self, primary_id: i64, secondary_id: i64) {
        self.entries.insert(primary_id, secondary_id);
    }

    /// Number of mapped ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Records of one series, keyed by id.
#[derive(Debug, Clone)]
pub struct Series {
    key: SeriesKey,
    last_id: Option<i64>,
    records: BTreeMap<i64, Record>,
    bindings: HashMap<Symbol, BindingTable>,
}

impl Series {
    /// Create an empty series.
    #[must_use]
    pub fn new(key: SeriesKey) -> Self {
        Self {
            key,
            last_id: None,
            records: BTreeMap::new(),
            bindings: HashMap::new(),
        }
    }

    /// Series key.
    #[must_use]
    pub const fn key(&self) -> &SeriesKey {
        &self.key
    }

    /// Series kind.
    #[must_use]
    pub const fn kind(&self) -> SeriesKind {
        SeriesKind::from_duration(self.key.duration_nanos)
    }

    /// Highest id reported by the server, once received.
    #[must_use]
    pub const fn last_id(&self) -> Option<i64> {
        self.last_id
    }

    /// Check if the server has started delivering this series.
    #[must_use]
    pub const fn is_received(&self) -> bool {
        self.last_id.is_some()
    }

    /// Look up a record by id.
    #[must_use]
    pub fn get(&self, id: i64) -> Option<&Record> {
        self.records.get(&id)
    }

    /// Records with `left <= id <= right`, ascending by id.
    pub fn range(&self, left: i64, right: i64) -> impl Iterator<Item = &Record> {
        (left <= right)
            .then(|| self.records.range(left..=right))
            .into_iter()
            .flatten()
            .map(|(_, record)| record)
    }

    /// All record ids, ascending.
    pub fn ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.records.keys().copied()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the series holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Binding table for a secondary symbol.
    #[must_use]
    pub fn binding(&self, secondary: &str) -> Option<&BindingTable> {
        self.bindings.get(secondary)
    }

    /// Merge a kline fragment. Returns the ids touched, in ascending order.
    pub fn merge_klines(&mut self, fragment: &KlineFragment) -> Vec<i64> {
        if fragment.last_id.is_some() {
            self.last_id = fragment.last_id;
        }

        for (secondary, patch) in &fragment.binding {
            let table = self.bindings.entry(secondary.clone()).or_default();
            for (primary_id, secondary_id) in &patch.0 {
                match primary_id.parse::<i64>() {
                    Ok(id) => table.bind(id, *secondary_id),
                    Err(_) => tracing::warn!(
                        symbol = %self.key.symbol,
                        secondary = %secondary,
                        key = %primary_id,
                        "Ignoring non-numeric binding id"
                    ),
                }
            }
        }

        let mut touched = Vec::with_capacity(fragment.data.len());
        for (raw_id, patch) in &fragment.data {
            let Some(id) = self.parse_id(raw_id) else {
                continue;
            };
            let symbol = &self.key.symbol;
            self.records
                .entry(id)
                .or_insert_with(|| Record::bar(id, symbol.clone()))
                .apply_bar(patch);
            touched.push(id);
        }
        touched.sort_unstable();
        touched
    }

    /// Merge a tick fragment. Returns the ids touched, in ascending order.
    pub fn merge_ticks(&mut self, fragment: &TickFragment) -> Vec<i64> {
        if fragment.last_id.is_some() {
            self.last_id = fragment.last_id;
        }

        let mut touched = Vec::with_capacity(fragment.data.len());
        for (raw_id, patch) in &fragment.data {
            let Some(id) = self.parse_id(raw_id) else {
                continue;
            };
            let symbol = &self.key.symbol;
            self.records
                .entry(id)
                .or_insert_with(|| Record::tick(id, symbol.clone()))
                .apply_tick(patch);
            touched.push(id);
        }
        touched.sort_unstable();
        touched
    }

    fn parse_id(&self, raw: &str) -> Option<i64> {
        match raw.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(
                    symbol = %self.key.symbol,
                    key = %raw,
                    "Ignoring record with non-numeric id"
                );
                None
            }
        }
    }
}
