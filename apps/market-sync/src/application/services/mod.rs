//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - [`Exporter`]: walks chart windows page by page into a row sink

pub mod export;

pub use export::{ExportError, ExportJob, ExportSummary, Exporter, Progress};
