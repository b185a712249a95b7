//! Shared vocabulary for spans and metrics.
//!
//! - [`attributes`]: attribute keys and `KeyValue` constructors
//! - [`instruments`]: metric declarations with unit and kind

pub mod attributes;
pub mod instruments;

pub use instruments::{InstrumentKind, MetricDef, Unit};
