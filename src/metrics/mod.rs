//! Metrics module
//!
//! - [`watcher`]: reads trigger values from Prometheus
//! - [`operator`]: the operator's own counters and gauges

pub mod operator;
mod watcher;

pub use watcher::{MetricsConfig, MetricsWatcher};
