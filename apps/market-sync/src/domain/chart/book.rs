//! All chart windows and series of one client.

use std::collections::{BTreeMap, HashMap};

use super::record::Record;
use super::request::ChartSubscription;
use super::series::{Series, SeriesKey};
use super::window::{ChartPhase, ChartWindow, Placement, StaleWindow};
use crate::domain::duration::TICK_DURATION;
use crate::domain::streaming::DataFragment;

/// What one fragment changed for one chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartUpdate {
    /// Chart id.
    pub chart_id: String,
    /// Phase after the fragment was applied.
    pub phase: ChartPhase,
    /// Touched in-window records, as `(symbol, id)`, ascending by symbol then id.
    pub in_window: Vec<(String, i64)>,
    /// Touched records outside the window.
    pub overflow: Vec<(String, i64)>,
}

/// Chart windows keyed by chart id, plus the series they read from.
#[derive(Debug, Default)]
pub struct ChartBook {
    windows: HashMap<String, ChartWindow>,
    series: HashMap<SeriesKey, Series>,
    history_pending: bool,
}

impl ChartBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a subscription, superseding any previous one with the same id.
    pub fn subscribe(&mut self, subscription: ChartSubscription) {
        match self.windows.get_mut(&subscription.chart_id) {
            Some(window) => window.supersede(subscription),
            None => {
                self.windows
                    .insert(subscription.chart_id.clone(), ChartWindow::new(subscription));
            }
        }
    }

    /// Stop tracking a chart.
    pub fn release(&mut self, chart_id: &str) -> Option<ChartWindow> {
        self.windows.remove(chart_id)
    }

    /// Window of a chart.
    #[must_use]
    pub fn window(&self, chart_id: &str) -> Option<&ChartWindow> {
        self.windows.get(chart_id)
    }

    /// Mutable window of a chart.
    pub fn window_mut(&mut self, chart_id: &str) -> Option<&mut ChartWindow> {
        self.windows.get_mut(chart_id)
    }

    /// Active subscriptions, for reissuing after a reconnect.
    pub fn subscriptions(&self) -> impl Iterator<Item = &ChartSubscription> {
        self.windows.values().map(ChartWindow::subscription)
    }

    /// Series for a symbol and duration.
    #[must_use]
    pub fn series(&self, symbol: &str, duration_nanos: i64) -> Option<&Series> {
        self.series.get(&SeriesKey::new(symbol, duration_nanos))
    }

    /// Global `mdhis_more_data` flag.
    #[must_use]
    pub const fn history_pending(&self) -> bool {
        self.history_pending
    }

    /// In-window records of one symbol of a chart.
    ///
    /// # Errors
    ///
    /// Returns [`StaleWindow`] while the chart is not ready or unknown.
    pub fn in_window(&self, chart_id: &str, symbol: &str) -> Result<Vec<&Record>, StaleWindow> {
        let window = self.windows.get(chart_id).ok_or_else(|| StaleWindow {
            chart_id: chart_id.to_string(),
            phase: ChartPhase::Subscribing,
        })?;
        match self.series(symbol, window.subscription().duration_nanos) {
            Some(series) => window.in_window(series),
            None => Ok(Vec::new()),
        }
    }

    /// Forget all server state after the transport was lost.
    ///
    /// Subscriptions are kept so they can be reissued.
    pub fn reset(&mut self) {
        for window in self.windows.values_mut() {
            window.reset();
        }
        self.series.clear();
        self.history_pending = false;
    }

    /// Merge one `rtn_data` fragment.
    ///
    /// Records are always stored; the returned updates only list records as
    /// in-window once the chart is ready.
    pub fn apply(&mut self, fragment: &DataFragment) -> Vec<ChartUpdate> {
        if let Some(pending) = fragment.mdhis_more_data {
            self.history_pending = pending;
        }

        for (chart_id, state) in &fragment.charts {
            match self.windows.get_mut(chart_id) {
                Some(window) => window.apply_state(state),
                None => tracing::debug!(chart_id = %chart_id, "State for untracked chart"),
            }
        }

        let mut touched: BTreeMap<SeriesKey, Vec<i64>> = BTreeMap::new();

        for (symbol, durations) in &fragment.klines {
            for (raw_duration, kline) in &durations.0 {
                let Ok(duration) = raw_duration.parse::<i64>() else {
                    tracing::warn!(
                        symbol = %symbol,
                        duration = %raw_duration,
                        "Ignoring kline series with non-numeric duration"
                    );
                    continue;
                };
                let key = SeriesKey::new(symbol.clone(), duration);
                let ids = self
                    .series
                    .entry(key.clone())
                    .or_insert_with(|| Series::new(key.clone()))
                    .merge_klines(kline);
                touched.entry(key).or_default().extend(ids);
            }
        }

        for (symbol, tick) in &fragment.ticks {
            let key = SeriesKey::new(symbol.clone(), TICK_DURATION);
            let ids = self
                .series
                .entry(key.clone())
                .or_insert_with(|| Series::new(key.clone()))
                .merge_ticks(tick);
            touched.entry(key).or_default().extend(ids);
        }

        let mut updates = Vec::new();
        for window in self.windows.values_mut() {
            let subscription = window.subscription();
            let series_received = subscription.symbols.iter().all(|symbol| {
                self.series
                    .get(&SeriesKey::new(symbol.clone(), subscription.duration_nanos))
                    .is_some_and(Series::is_received)
            });

            let before = window.phase();
            let phase = window.refresh(series_received, self.history_pending);

            let mut in_window = Vec::new();
            let mut overflow = Vec::new();
            if matches!(phase, ChartPhase::Ready | ChartPhase::Exhausted) {
                for (key, ids) in &touched {
                    if !window.subscription().covers(&key.symbol, key.duration_nanos) {
                        continue;
                    }
                    for id in ids {
                        match window.classify(*id) {
                            Some(Placement::InWindow) => in_window.push((key.symbol.clone(), *id)),
                            Some(Placement::Overflow) | None => {
                                overflow.push((key.symbol.clone(), *id));
                            }
                        }
                    }
                }
            }

            if phase != before || !in_window.is_empty() || !overflow.is_empty() {
                updates.push(ChartUpdate {
                    chart_id: window.chart_id().to_string(),
                    phase,
                    in_window,
                    overflow,
                });
            }
        }
        updates.sort_by(|a, b| a.chart_id.cmp(&b.chart_id));
        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chart::request::ChartRequest;
    use crate::domain::duration::MINUTE_NANOS;
    use serde_json::json;

    fn subscribe(book: &mut ChartBook, symbols: &[&str]) -> ChartSubscription {
        let sub = ChartRequest::new(
            "c1",
            symbols.iter().map(ToString::to_string).collect(),
            MINUTE_NANOS,
        )
        .with_bar_count(3)
        .subscription()
        .unwrap();
        book.subscribe(sub.clone());
        sub
    }

    fn frame(value: serde_json::Value) -> DataFragment {
        serde_json::from_value(value).unwrap()
    }

    fn chart_frame(sub: &ChartSubscription, left: i64, right: i64) -> DataFragment {
        frame(json!({
            "charts": {"c1": {"left_id": left, "right_id": right, "state": sub.requested_fields}}
        }))
    }

    fn kline_frame(symbol: &str, ids: std::ops::RangeInclusive<i64>) -> DataFragment {
        let data: serde_json::Map<String, serde_json::Value> = ids
            .clone()
            .map(|id| (id.to_string(), json!({"datetime": id * MINUTE_NANOS, "close": id})))
            .collect();
        frame(json!({
            "klines": {symbol: {MINUTE_NANOS.to_string(): {"last_id": ids.end(), "data": data}}}
        }))
    }

    #[test]
    fn window_bounds_filter_output() {
        let mut book = ChartBook::new();
        let sub = subscribe(&mut book, &["A"]);

        book.apply(&chart_frame(&sub, 10, 12));
        let updates = book.apply(&kline_frame("A", 10..=13));

        assert_eq!(updates.len(), 1);
        let update = &updates[0];
        assert_eq!(update.phase, ChartPhase::Ready);
        assert_eq!(
            update.in_window,
            vec![("A".to_string(), 10), ("A".to_string(), 11), ("A".to_string(), 12)]
        );
        assert_eq!(update.overflow, vec![("A".to_string(), 13)]);

        let ids: Vec<i64> = book.in_window("c1", "A").unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![10, 11, 12]);
        assert_eq!(book.series("A", MINUTE_NANOS).unwrap().len(), 4);
    }

    #[test]
    fn records_before_ack_are_kept() {
        let mut book = ChartBook::new();
        let sub = subscribe(&mut book, &["A"]);

        let early = book.apply(&kline_frame("A", 0..=2));
        assert!(early.iter().all(|u| u.in_window.is_empty()));
        assert!(book.in_window("c1", "A").is_err());

        book.apply(&chart_frame(&sub, 0, 2));
        let ids: Vec<i64> = book.in_window("c1", "A").unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn every_symbol_must_report_its_series() {
        let mut book = ChartBook::new();
        let sub = subscribe(&mut book, &["A", "B"]);
        book.apply(&chart_frame(&sub, 0, 2));
        book.apply(&kline_frame("A", 0..=2));
        assert_eq!(book.window("c1").unwrap().phase(), ChartPhase::PartiallyAcked);

        book.apply(&kline_frame("B", 0..=1));
        assert_eq!(book.window("c1").unwrap().phase(), ChartPhase::Ready);
    }

    #[test]
    fn history_flag_tracks_latest_value() {
        let mut book = ChartBook::new();
        let sub = subscribe(&mut book, &["A"]);
        book.apply(&frame(json!({"mdhis_more_data": true})));
        book.apply(&chart_frame(&sub, 0, 2));
        book.apply(&kline_frame("A", 0..=2));
        assert!(book.history_pending());
        assert!(!book.window("c1").unwrap().is_final());

        book.apply(&frame(json!({"mdhis_more_data": false})));
        assert!(book.window("c1").unwrap().is_final());
    }

    #[test]
    fn reset_clears_state_but_keeps_subscriptions() {
        let mut book = ChartBook::new();
        let sub = subscribe(&mut book, &["A"]);
        book.apply(&chart_frame(&sub, 0, 2));
        book.apply(&kline_frame("A", 0..=2));

        book.reset();
        assert_eq!(book.window("c1").unwrap().phase(), ChartPhase::Subscribing);
        assert!(book.series("A", MINUTE_NANOS).is_none());
        assert_eq!(book.subscriptions().count(), 1);
    }

    #[test]
    fn release_removes_window() {
        let mut book = ChartBook::new();
        subscribe(&mut book, &["A"]);
        assert!(book.release("c1").is_some());
        assert!(book.window("c1").is_none());
        assert!(book.release("c1").is_none());
    }
}
