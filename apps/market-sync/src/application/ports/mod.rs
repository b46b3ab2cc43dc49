//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`Connector`]: opens framed sockets to the market data front
//! - [`ChartFeed`]: chart subscriptions and the book they fill
//! - [`RowSink`]: receives aligned export rows

mod chart_feed_port;
mod row_sink_port;
mod transport_port;

pub use chart_feed_port::{ChartFeed, FeedError, FeedLiveness};
pub use row_sink_port::{MemorySink, RowSink, SinkError};
pub use transport_port::{Connector, FrameSink, FrameStream, TransportError, WireFrame};
