//! Metrics and observability module
//!
//! Counters for every policy outcome of the filter, exported in Prometheus
//! format when an exporter is installed. Without an installed recorder the
//! `metrics` macros are no-ops.

pub mod exporter;
pub mod recorder;

pub use exporter::{render_metrics, start_metrics_server, MetricsConfig, MetricsError};
pub use recorder::init_metrics;
