//! Prometheus text exposition format.
//!
//! Renders a [`HealthReport`] into the text format scraped by a Prometheus
//! server. Every series is unlabelled; one worker pool per process.

use std::fmt::Write;

use vigil_health::HealthReport;

pub const METRIC_PREFIX: &str = "vigil_worker_";

#[derive(Clone, Copy)]
enum Kind {
    Gauge,
    Counter,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Kind::Gauge => "gauge",
            Kind::Counter => "counter",
        }
    }
}

fn series(out: &mut String, name: &str, help: &str, kind: Kind, value: impl std::fmt::Display) {
    // Writing into a String cannot fail.
    let _ = writeln!(out, "# HELP {METRIC_PREFIX}{name} {help}");
    let _ = writeln!(out, "# TYPE {METRIC_PREFIX}{name} {}", kind.as_str());
    let _ = writeln!(out, "{METRIC_PREFIX}{name} {value}");
}

/// Render a health report, plus the total number of alerts raised so far,
/// into Prometheus text format.
pub fn render_prometheus(report: &HealthReport, alerts_total: usize) -> String {
    let mut out = String::new();
    let memory = &report.memory;
    let worker = &report.worker;

    series(&mut out, "health_score", "Overall health score (0-100).", Kind::Gauge, report.overall_health);
    series(
        &mut out,
        "heap_used_bytes",
        "Heap in use, in bytes.",
        Kind::Gauge,
        memory.heap_used_bytes,
    );
    series(
        &mut out,
        "heap_total_bytes",
        "Heap size, in bytes.",
        Kind::Gauge,
        memory.heap_total_bytes,
    );
    series(
        &mut out,
        "heap_used_percent",
        "Heap in use as a percentage of the heap size.",
        Kind::Gauge,
        memory.heap_used_percent,
    );
    series(
        &mut out,
        "memory_trend_slope",
        "Relative heap growth between the recent and older sample windows.",
        Kind::Gauge,
        format_args!("{:.2}", memory.trend.slope),
    );
    series(
        &mut out,
        "active_sessions",
        "Sessions currently open.",
        Kind::Gauge,
        report.sessions.active_count,
    );
    series(
        &mut out,
        "sessions_total",
        "Sessions created since the pool started.",
        Kind::Counter,
        report.sessions.total_sessions,
    );
    series(
        &mut out,
        "failed_sessions_total",
        "Sessions that ended in failure.",
        Kind::Counter,
        report.sessions.failed_sessions,
    );
    series(
        &mut out,
        "session_error_rate",
        "Errors per request across open sessions (0.0-1.0).",
        Kind::Gauge,
        format_args!("{:.4}", report.sessions.avg_error_rate),
    );
    series(
        &mut out,
        "operations_succeeded_total",
        "Operations that succeeded, as reported by the pool.",
        Kind::Counter,
        worker.succeeded_operations,
    );
    series(
        &mut out,
        "operations_failed_total",
        "Operations that failed, as reported by the pool.",
        Kind::Counter,
        worker.failed_operations,
    );
    series(
        &mut out,
        "operation_latency_avg_ms",
        "Average latency of recent operations in milliseconds.",
        Kind::Gauge,
        report.operations.avg_latency_ms,
    );
    series(
        &mut out,
        "restarts_total",
        "Worker restarts performed by the pool.",
        Kind::Counter,
        worker.browser_restarts,
    );
    series(
        &mut out,
        "auto_restarts",
        "Automatic restarts inside the current ledger window.",
        Kind::Gauge,
        report.auto_restart_count,
    );
    series(
        &mut out,
        "circuit_breaker_open",
        "1 when the circuit breaker is open.",
        Kind::Gauge,
        u8::from(worker.circuit_breaker_status.is_open()),
    );
    series(
        &mut out,
        "uptime_seconds",
        "Seconds since the health monitor started.",
        Kind::Gauge,
        report.uptime_ms / 1000,
    );
    series(
        &mut out,
        "alerts_total",
        "Alerts currently retained.",
        Kind::Gauge,
        alerts_total,
    );

    out
}
