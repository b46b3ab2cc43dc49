//! Chart Window Reconstruction
//!
//! Turns the stream of partial chart, kline and tick fragments into ordered,
//! deduplicated, bounded series.
//!
//! - [`request`]: `set_chart` requests and validated subscriptions
//! - [`record`]: bar and tick records merged field by field
//! - [`series`]: per-symbol record stores and binding tables
//! - [`window`]: per-chart phase machine and completeness gate
//! - [`book`]: all windows and series of one client

pub mod book;
pub mod record;
pub mod request;
pub mod series;
pub mod window;

pub use book::{ChartBook, ChartUpdate};
pub use record::{BAR_COLUMNS, Record, RecordFields, SeriesKind, TICK_COLUMNS};
pub use request::{ChartError, ChartRequest, ChartSubscription, DEFAULT_VIEW_WIDTH, generate_chart_id};
pub use series::{BindingTable, Series, SeriesKey};
pub use window::{ChartPhase, ChartState, ChartWindow, Placement, StaleWindow, gate_passes};
