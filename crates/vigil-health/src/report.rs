//! Telemetry records, health report types, and recommendations.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use vigil_core::{PolicySettings, WorkerMetrics};

use crate::trend::{MemoryTrend, RiskLevel};

/// Outcome of one monitored operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub timestamp: u64,
    pub context_key: String,
    pub operation: String,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub timestamp: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    pub key: String,
    pub age_ms: u64,
    pub inactive_ms: u64,
    pub error_count: u64,
    pub request_count: u64,
    pub is_stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub active_count: u32,
    pub total_sessions: u64,
    pub failed_sessions: u64,
    pub total_error_count: u64,
    pub total_request_count: u64,
    /// Errors per request across live sessions; 0 without requests.
    pub avg_error_rate: f64,
    pub session_details: Vec<SessionDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetrics {
    /// False when the probe could not produce a sample.
    pub available: bool,
    /// Raw probe counts; the `_mb` fields are these rounded to MiB.
    pub heap_used_bytes: u64,
    pub heap_total_bytes: u64,
    pub heap_used_mb: u64,
    pub heap_total_mb: u64,
    pub heap_used_percent: u32,
    pub rss_mb: u64,
    pub external_mb: u64,
    pub is_warning: bool,
    pub is_critical: bool,
    pub trend: MemoryTrend,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStats {
    pub recent_operations: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Percentage with one decimal; `None` without operations.
    pub success_rate: Option<f64>,
    pub avg_latency_ms: u64,
    pub operation_breakdown: BTreeMap<String, usize>,
}

impl OperationStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a OperationRecord>) -> Self {
        let mut stats = OperationStats {
            recent_operations: 0,
            succeeded: 0,
            failed: 0,
            success_rate: None,
            avg_latency_ms: 0,
            operation_breakdown: BTreeMap::new(),
        };
        let mut total_latency: u64 = 0;

        for record in records {
            stats.recent_operations += 1;
            if record.success {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }
            total_latency = total_latency.saturating_add(record.duration_ms);
            *stats
                .operation_breakdown
                .entry(record.operation.clone())
                .or_insert(0) += 1;
        }

        if stats.recent_operations > 0 {
            let n = stats.recent_operations as f64;
            stats.avg_latency_ms = (total_latency as f64 / n).round() as u64;
            stats.success_rate = Some((stats.succeeded as f64 / n * 1000.0).round() / 10.0);
        }
        stats
    }
}

/// Subscores in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthScores {
    pub browser: u32,
    pub memory: u32,
    pub operations: u32,
    pub circuit_breaker: u32,
}

impl HealthScores {
    pub fn compute(
        worker: &WorkerMetrics,
        memory: &MemoryMetrics,
        operations: &OperationStats,
    ) -> Self {
        let memory_score = if memory.is_critical {
            10
        } else if memory.is_warning {
            50
        } else {
            100
        };
        let total = operations.succeeded + operations.failed;
        let operations_score = if total == 0 {
            100
        } else {
            (operations.succeeded as f64 / total as f64 * 100.0).round() as u32
        };
        Self {
            browser: if worker.healthy { 100 } else { 0 },
            memory: memory_score,
            operations: operations_score.min(100),
            circuit_breaker: if worker.circuit_breaker_status.is_open() { 0 } else { 100 },
        }
    }

    /// Rounded mean of the four subscores.
    pub fn overall(&self) -> u32 {
        let sum = self.browser + self.memory + self.operations + self.circuit_breaker;
        (sum as f64 / 4.0).round() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub timestamp: u64,
    pub uptime_ms: u64,
    pub overall_health: u32,
    pub health_scores: HealthScores,
    pub sessions: SessionMetrics,
    pub memory: MemoryMetrics,
    pub operations: OperationStats,
    pub worker: WorkerMetrics,
    pub auto_restart_count: u32,
    pub recent_alerts: Vec<Alert>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub version: String,
    pub os: String,
    pub arch: String,
    pub pid: u32,
    pub uptime_ms: u64,
}

impl SystemInfo {
    pub fn current(uptime_ms: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            pid: std::process::id(),
            uptime_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSummary {
    pub circuit_breaker_open: bool,
    pub consecutive_errors: u32,
    pub worker_restarts: u64,
    pub max_concurrent_sessions: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsReport {
    pub generated_at: u64,
    pub system: SystemInfo,
    pub worker: WorkerSummary,
    pub performance: HealthReport,
    pub recommendations: Vec<String>,
}

/// Advisory lines for operators. When nothing is wrong and every subscore
/// is near perfect, a single all-clear line is returned instead.
pub fn generate_recommendations(report: &HealthReport, settings: &PolicySettings) -> Vec<String> {
    let mut lines = Vec::new();
    let scores = &report.health_scores;

    if scores.memory < 75 {
        lines.push(
            "WARNING: high memory usage; consider clearing old sessions or restarting the worker"
                .to_string(),
        );
    }

    match report.memory.trend.risk_level {
        RiskLevel::High => lines.push(format!(
            "CRITICAL: memory leak suspected, heap grew {}% between windows; restart recommended",
            report.memory.trend.slope_percent()
        )),
        RiskLevel::Medium => lines.push(format!(
            "WARNING: heap grew {}% between windows; monitor closely",
            report.memory.trend.slope_percent()
        )),
        RiskLevel::Low => {}
    }

    if scores.circuit_breaker == 0 {
        lines.push(
            "CRITICAL: circuit breaker is open after repeated failures; check worker health"
                .to_string(),
        );
    }

    if report.sessions.avg_error_rate > 0.2 {
        lines.push(
            "WARNING: high session error rate; check network stability and target domains"
                .to_string(),
        );
    }

    let max_sessions = settings.sessions.max_concurrent_sessions as f64;
    if f64::from(report.sessions.active_count) >= max_sessions * 0.9 {
        lines.push(
            "WARNING: operating near maximum concurrent sessions; raise capacity or shorten session TTL"
                .to_string(),
        );
    }

    if report.operations.success_rate == Some(0.0) && report.operations.recent_operations > 0 {
        lines.push(
            "CRITICAL: all recent operations failed; the worker may be in a broken state".to_string(),
        );
    }

    if report.memory.is_critical {
        lines.push(format!(
            "CRITICAL: heap usage above {}%; immediate restart recommended",
            settings.memory.heap_critical_threshold
        ));
    }

    if report.auto_restart_count > 3 {
        lines.push(format!(
            "WARNING: worker auto-restarted {} times; investigate the root cause",
            report.auto_restart_count
        ));
    }

    if lines.is_empty()
        && scores.browser == 100
        && scores.memory > 80
        && scores.operations > 90
        && scores.circuit_breaker == 100
    {
        lines.push("OK: worker is operating normally".to_string());
    }

    lines
}
