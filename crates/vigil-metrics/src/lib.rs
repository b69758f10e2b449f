//! vigil-metrics — Prometheus-compatible exposition of worker health.
//!
//! ```text
//! HealthMonitor::health_report() ──► render_prometheus() ──► text/plain
//! ```

pub mod prometheus;

pub use prometheus::{METRIC_PREFIX, render_prometheus};
