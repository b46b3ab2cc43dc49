//! Chart window state machine.
//!
//! A [`ChartWindow`] tracks one chart id from the moment its `set_chart`
//! request is issued until the server has applied it, and decides which
//! records of its series are visible.
//!
//! # Phases
//!
//! ```text
//! Subscribing ──state──▶ PartiallyAcked ──gate + bounds + series──▶ Ready
//!      ▲                                                              │
//!      └──────────── supersede / transport reset ◀── Exhausted ◀──────┘
//! ```
//!
//! # Completeness Gate
//!
//! The server echoes the parameters it has applied under `charts.<id>.state`.
//! Until every requested field is present there with the requested value, the
//! bounds may still describe a previous request, so nothing is emitted.

use std::collections::BTreeMap;

use serde_json::Value;

use super::record::Record;
use super::request::ChartSubscription;
use super::series::Series;
use crate::domain::streaming::ChartStateFragment;

/// Lifecycle phase of a chart window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChartPhase {
    /// Request issued, nothing heard back.
    Subscribing,
    /// Server state received but the request is not fully applied yet.
    PartiallyAcked,
    /// Bounds are authoritative; in-window records can be read.
    Ready,
    /// The consumer has read the whole window.
    Exhausted,
}

impl std::fmt::Display for ChartPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Subscribing => "subscribing",
            Self::PartiallyAcked => "partially_acked",
            Self::Ready => "ready",
            Self::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

/// A read against a window whose bounds are not authoritative.
///
/// This is a "not yet" answer, not a failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("chart {chart_id} is not ready ({phase})")]
pub struct StaleWindow {
    /// Chart id.
    pub chart_id: String,
    /// Phase at the time of the read.
    pub phase: ChartPhase,
}

/// Where a record falls relative to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// `left_id <= id <= right_id`.
    InWindow,
    /// Outside the bounds; kept but not emitted.
    Overflow,
}

/// Merged server state of a chart.
///
/// Fields are only ever added or overwritten, never removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartState {
    /// Left bound.
    pub left_id: Option<i64>,
    /// Right bound.
    pub right_id: Option<i64>,
    /// Per-chart "more data" flag.
    pub more_data: Option<bool>,
    /// Server readiness flag.
    pub ready: Option<bool>,
    /// Echoed request parameters.
    pub fields: BTreeMap<String, Value>,
}

impl ChartState {
    /// Merge a fragment.
    pub fn merge(&mut self, fragment: &ChartStateFragment) {
        if fragment.left_id.is_some() {
            self.left_id = fragment.left_id;
        }
        if fragment.right_id.is_some() {
            self.right_id = fragment.right_id;
        }
        if fragment.more_data.is_some() {
            self.more_data = fragment.more_data;
        }
        if fragment.ready.is_some() {
            self.ready = fragment.ready;
        }
        if let Some(state) = &fragment.state {
            for (key, value) in state {
                self.fields.insert(key.clone(), value.clone());
            }
        }
    }

    /// Both bounds, once received.
    #[must_use]
    pub const fn bounds(&self) -> Option<(i64, i64)> {
        match (self.left_id, self.right_id) {
            (Some(left), Some(right)) => Some((left, right)),
            _ => None,
        }
    }
}

/// Completeness gate: every requested field is echoed with the same value.
#[must_use]
pub fn gate_passes(requested: &BTreeMap<String, Value>, merged: &BTreeMap<String, Value>) -> bool {
    requested
        .iter()
        .all(|(key, value)| merged.get(key) == Some(value))
}

/// One chart id's window.
#[derive(Debug, Clone)]
pub struct ChartWindow {
    subscription: ChartSubscription,
    state: ChartState,
    phase: ChartPhase,
    acked: bool,
    history_pending: bool,
}

impl ChartWindow {
    /// Start tracking a freshly issued subscription.
    #[must_use]
    pub fn new(subscription: ChartSubscription) -> Self {
        Self {
            subscription,
            state: ChartState::default(),
            phase: ChartPhase::Subscribing,
            acked: false,
            history_pending: false,
        }
    }

    /// Current subscription.
    #[must_use]
    pub const fn subscription(&self) -> &ChartSubscription {
        &self.subscription
    }

    /// Merged server state.
    #[must_use]
    pub const fn state(&self) -> &ChartState {
        &self.state
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> ChartPhase {
        self.phase
    }

    /// Chart id.
    #[must_use]
    pub fn chart_id(&self) -> &str {
        &self.subscription.chart_id
    }

    /// Ready and no more history is pending, so `right_id` is final.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.phase == ChartPhase::Ready && !self.history_pending
    }

    /// Replace the subscription after a reissue with new parameters.
    ///
    /// Merged state is kept; the gate has to pass again for the new request.
    pub fn supersede(&mut self, subscription: ChartSubscription) {
        self.subscription = subscription;
        self.phase = ChartPhase::Subscribing;
        self.acked = false;
    }

    /// Forget all server state (transport loss).
    pub fn reset(&mut self) {
        self.state = ChartState::default();
        self.phase = ChartPhase::Subscribing;
        self.acked = false;
        self.history_pending = false;
    }

    /// Merge a chart state fragment.
    pub fn apply_state(&mut self, fragment: &ChartStateFragment) {
        let previous = self.state.bounds();
        self.state.merge(fragment);
        self.acked = true;

        if self.phase == ChartPhase::Ready
            && let (Some((old_left, old_right)), Some((left, right))) =
                (previous, self.state.bounds())
            && (left < old_left || right < old_right)
        {
            tracing::warn!(
                chart_id = %self.subscription.chart_id,
                old_left,
                old_right,
                left,
                right,
                "Chart bounds moved backwards"
            );
        }
    }

    /// Check the completeness gate against the merged state.
    #[must_use]
    pub fn gate_open(&self) -> bool {
        gate_passes(&self.subscription.requested_fields, &self.state.fields)
    }

    /// Recompute the phase.
    ///
    /// `series_received` tells whether every subscribed symbol's series has
    /// reported a `last_id`; `history_pending` is the global
    /// `mdhis_more_data` flag.
    pub fn refresh(&mut self, series_received: bool, history_pending: bool) -> ChartPhase {
        self.history_pending = history_pending;

        let next = if !self.acked {
            ChartPhase::Subscribing
        } else if self.gate_open() && self.state.bounds().is_some() && series_received {
            if self.phase == ChartPhase::Exhausted {
                ChartPhase::Exhausted
            } else {
                ChartPhase::Ready
            }
        } else {
            ChartPhase::PartiallyAcked
        };

        if next != self.phase {
            tracing::debug!(
                chart_id = %self.subscription.chart_id,
                from = %self.phase,
                to = %next,
                "Chart phase changed"
            );
            self.phase = next;
        }
        next
    }

    /// Mark the window as fully consumed.
    pub fn mark_exhausted(&mut self) {
        if self.phase == ChartPhase::Ready {
            self.phase = ChartPhase::Exhausted;
        }
    }

    /// Classify a record id against the current bounds.
    #[must_use]
    pub fn classify(&self, id: i64) -> Option<Placement> {
        let (left, right) = self.state.bounds()?;
        Some(if (left..=right).contains(&id) {
            Placement::InWindow
        } else {
            Placement::Overflow
        })
    }

    fn ready_bounds(&self) -> Result<(i64, i64), StaleWindow> {
        let stale = || StaleWindow {
            chart_id: self.subscription.chart_id.clone(),
            phase: self.phase,
        };
        match self.phase {
            ChartPhase::Ready | ChartPhase::Exhausted => self.state.bounds().ok_or_else(stale),
            ChartPhase::Subscribing | ChartPhase::PartiallyAcked => Err(stale()),
        }
    }

    /// In-window records of a series, ascending by id.
    ///
    /// # Errors
    ///
    /// Returns [`StaleWindow`] while the window is not ready.
    pub fn in_window<'a>(&self, series: &'a Series) -> Result<Vec<&'a Record>, StaleWindow> {
        let (left, right) = self.ready_bounds()?;
        Ok(series.range(left, right).collect())
    }

    /// Records of a series outside the window, ascending by id.
    ///
    /// # Errors
    ///
    /// Returns [`StaleWindow`] while the window is not ready.
    pub fn overflow<'a>(&self, series: &'a Series) -> Result<Vec<&'a Record>, StaleWindow> {
        let (left, right) = self.ready_bounds()?;
        Ok(series
            .ids()
            .filter(|id| *id < left || *id > right)
            .filter_map(|id| series.get(id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chart::request::ChartRequest;
    use crate::domain::chart::series::SeriesKey;
    use crate::domain::duration::MINUTE_NANOS;
    use crate::domain::streaming::{BarPatch, KlineFragment};
    use proptest::prelude::*;
    use serde_json::{Map, json};

    fn subscription() -> ChartSubscription {
        ChartRequest::new("c1", vec!["A".into()], MINUTE_NANOS)
            .with_bar_count(3)
            .subscription()
            .unwrap()
    }

    fn echo(sub: &ChartSubscription) -> Map<String, Value> {
        sub.requested_fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn bounds_fragment(sub: &ChartSubscription, left: i64, right: i64) -> ChartStateFragment {
        ChartStateFragment {
            left_id: Some(left),
            right_id: Some(right),
            state: Some(echo(sub)),
            ..ChartStateFragment::default()
        }
    }

    fn series_with(ids: &[i64]) -> Series {
        let mut series = Series::new(SeriesKey::new("A", MINUTE_NANOS));
        let fragment = KlineFragment {
            last_id: ids.iter().max().copied(),
            data: ids
                .iter()
                .map(|id| {
                    (
                        id.to_string(),
                        BarPatch {
                            datetime: Some(*id),
                            ..BarPatch::default()
                        },
                    )
                })
                .collect(),
            ..KlineFragment::default()
        };
        series.merge_klines(&fragment);
        series
    }

    #[test]
    fn bounded_window_splits_in_window_and_overflow() {
        let sub = subscription();
        let mut window = ChartWindow::new(sub.clone());
        window.apply_state(&bounds_fragment(&sub, 10, 12));
        assert_eq!(window.refresh(true, false), ChartPhase::Ready);

        let series = series_with(&[10, 11, 12, 13]);
        let ids: Vec<i64> = window.in_window(&series).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![10, 11, 12]);
        let overflow: Vec<i64> = window.overflow(&series).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(overflow, vec![13]);
        assert_eq!(window.classify(13), Some(Placement::Overflow));
        assert_eq!(window.classify(10), Some(Placement::InWindow));
    }

    #[test]
    fn reads_before_ack_are_stale() {
        let window = ChartWindow::new(subscription());
        let err = window.in_window(&series_with(&[1])).unwrap_err();
        assert_eq!(err.phase, ChartPhase::Subscribing);
        assert_eq!(err.chart_id, "c1");
    }

    #[test]
    fn partial_echo_withholds_output() {
        let sub = subscription();
        let mut window = ChartWindow::new(sub.clone());
        let mut state = echo(&sub);
        state.remove("view_width");
        window.apply_state(&ChartStateFragment {
            left_id: Some(0),
            right_id: Some(2),
            state: Some(state),
            ..ChartStateFragment::default()
        });

        assert_eq!(window.refresh(true, false), ChartPhase::PartiallyAcked);
        assert!(window.in_window(&series_with(&[0, 1])).is_err());

        window.apply_state(&ChartStateFragment {
            state: Some(Map::from_iter([("view_width".to_string(), json!(3))])),
            ..ChartStateFragment::default()
        });
        assert_eq!(window.refresh(true, false), ChartPhase::Ready);
    }

    #[test]
    fn stale_value_does_not_pass_gate() {
        let sub = subscription();
        let mut window = ChartWindow::new(sub.clone());
        let mut state = echo(&sub);
        state.insert("view_width".into(), json!(2000));
        window.apply_state(&ChartStateFragment {
            left_id: Some(0),
            right_id: Some(2),
            state: Some(state),
            ..ChartStateFragment::default()
        });
        assert!(!window.gate_open());
    }

    #[test]
    fn readiness_waits_for_series() {
        let sub = subscription();
        let mut window = ChartWindow::new(sub.clone());
        window.apply_state(&bounds_fragment(&sub, 0, 5));
        assert_eq!(window.refresh(false, false), ChartPhase::PartiallyAcked);
        assert_eq!(window.refresh(true, true), ChartPhase::Ready);
        assert!(!window.is_final());
        window.refresh(true, false);
        assert!(window.is_final());
    }

    #[test]
    fn supersede_requires_gate_again() {
        let sub = subscription();
        let mut window = ChartWindow::new(sub.clone());
        window.apply_state(&bounds_fragment(&sub, 0, 2));
        window.refresh(true, false);
        window.mark_exhausted();
        assert_eq!(window.phase(), ChartPhase::Exhausted);

        let next = ChartRequest::new("c1", vec!["A".into()], MINUTE_NANOS)
            .with_bar_count(3)
            .paginate(3)
            .subscription()
            .unwrap();
        window.supersede(next.clone());
        assert_eq!(window.phase(), ChartPhase::Subscribing);

        // Old echo still lacks left_kline_id.
        window.apply_state(&ChartStateFragment::default());
        assert_eq!(window.refresh(true, false), ChartPhase::PartiallyAcked);

        window.apply_state(&bounds_fragment(&next, 3, 5));
        assert_eq!(window.refresh(true, false), ChartPhase::Ready);
        assert_eq!(window.state().bounds(), Some((3, 5)));
    }

    #[test]
    fn reset_returns_to_subscribing() {
        let sub = subscription();
        let mut window = ChartWindow::new(sub.clone());
        window.apply_state(&bounds_fragment(&sub, 0, 2));
        window.refresh(true, false);
        window.reset();
        assert_eq!(window.phase(), ChartPhase::Subscribing);
        assert_eq!(window.state(), &ChartState::default());
        assert_eq!(window.refresh(true, false), ChartPhase::Subscribing);
    }

    proptest! {
        #[test]
        fn in_window_output_sorted_and_unique(
            ids in prop::collection::vec(-5i64..40, 0..60),
            left in 0i64..20,
            width in 0i64..20,
        ) {
            let sub = subscription();
            let mut window = ChartWindow::new(sub.clone());
            window.apply_state(&bounds_fragment(&sub, left, left + width));
            window.refresh(true, false);

            let mut series = Series::new(SeriesKey::new("A", MINUTE_NANOS));
            for id in &ids {
                series.merge_klines(&KlineFragment {
                    last_id: Some(*id),
                    data: [(id.to_string(), BarPatch { datetime: Some(*id), ..BarPatch::default() })].into(),
                    ..KlineFragment::default()
                });
            }

            let out: Vec<i64> = window.in_window(&series).unwrap().iter().map(|r| r.id).collect();
            prop_assert!(out.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(out.iter().all(|id| (left..=left + width).contains(id)));

            let mut expected: Vec<i64> = ids.iter().copied().filter(|id| (left..=left + width).contains(id)).collect();
            expected.sort_unstable();
            expected.dedup();
            prop_assert_eq!(out, expected);
        }

        #[test]
        fn gate_is_monotonic_under_merge(order in Just((0..8usize).collect::<Vec<_>>()).prop_shuffle()) {
            let sub = ChartRequest::new("c1", vec!["A".into(), "B".into()], MINUTE_NANOS)
                .with_bar_count(10)
                .with_focus(5, 0)
                .subscription()
                .unwrap();
            let fields: Vec<(String, Value)> = sub.requested_fields.clone().into_iter().collect();
            let mut state = ChartState::default();
            let mut opened = false;

            for index in order {
                let Some((key, value)) = fields.get(index) else { continue };
                state.merge(&ChartStateFragment {
                    state: Some(Map::from_iter([
                        (key.clone(), value.clone()),
                        (format!("extra_{index}"), json!(index)),
                    ])),
                    ..ChartStateFragment::default()
                });
                let open = gate_passes(&sub.requested_fields, &state.fields);
                prop_assert!(!opened || open);
                opened = open;
            }
            prop_assert!(opened);
        }
    }
}
