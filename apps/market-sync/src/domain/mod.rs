//! Domain Layer - Market data synchronization state and algorithms.
//!
//! Everything here is pure: no sockets, no clocks, no tasks. The
//! infrastructure layer feeds decoded fragments in and reads state back out.

/// Multi-symbol row alignment for export.
pub mod align;

/// Chart windows, series and the completeness gate.
pub mod chart;

/// Bar duration labels.
pub mod duration;

/// Latest quotes per symbol.
pub mod quote;

/// Typed fragments of the mirrored data tree.
pub mod streaming;
