//! Health monitor: operation/alert telemetry, memory history, session
//! leases and the auto-restart ledger, all behind one lock.
//!
//! Readers only ever get snapshots. Worker pool and memory probe calls
//! happen outside the lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use vigil_core::{MemoryProbe, PolicyConfig, SessionInfo, WorkerMetrics, WorkerPool, epoch_millis};

use crate::leases::SessionLeases;
use crate::ledger::RestartLedger;
use crate::report::{
    Alert, DiagnosticsReport, HealthReport, HealthScores, MemoryMetrics, OperationRecord,
    OperationStats, SessionDetail, SessionMetrics, Severity, SystemInfo, WorkerSummary,
    generate_recommendations,
};
use crate::ring::BoundedLog;
use crate::trend::{self, LeakThresholds, MemorySample, MemoryTrend};

/// Records considered by [`HealthMonitor::operation_stats`].
const STATS_WINDOW: usize = 100;
/// Alerts embedded in a [`HealthReport`].
const REPORT_ALERTS: usize = 10;

struct MonitorState {
    operations: BoundedLog<OperationRecord>,
    alerts: BoundedLog<Alert>,
    memory: BoundedLog<MemorySample>,
    leases: SessionLeases,
    ledger: RestartLedger,
}

pub struct HealthMonitor {
    config: Arc<PolicyConfig>,
    probe: Arc<dyn MemoryProbe>,
    started: Instant,
    state: Mutex<MonitorState>,
}

impl HealthMonitor {
    pub fn new(config: Arc<PolicyConfig>, probe: Arc<dyn MemoryProbe>) -> Self {
        let settings = config.snapshot();
        let state = MonitorState {
            operations: BoundedLog::new(settings.diagnostics.max_log_entries),
            alerts: BoundedLog::new(settings.diagnostics.max_alerts),
            memory: BoundedLog::new(settings.memory.trend_tracking_samples),
            leases: SessionLeases::new(),
            ledger: RestartLedger::new(),
        };
        Self {
            config,
            probe,
            started: Instant::now(),
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &Arc<PolicyConfig> {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    // ── Operations and alerts ──────────────────────────────────────

    /// Record one operation. `error` is `None` on success.
    ///
    /// Failures raise an `operation_failure` alert; latency above
    /// `monitoring.operationLatencyMs` raises `high_latency`.
    pub fn record_operation(
        &self,
        context_key: &str,
        operation: &str,
        duration_ms: u64,
        error: Option<&str>,
    ) {
        let settings = self.config.snapshot();
        let record = OperationRecord {
            timestamp: epoch_millis(),
            context_key: context_key.to_string(),
            operation: operation.to_string(),
            duration_ms,
            success: error.is_none(),
            error: error.map(str::to_string),
        };

        {
            let mut state = self.lock();
            state.operations.set_capacity(settings.diagnostics.max_log_entries);
            state.operations.push(record);
        }

        if settings.diagnostics.log_operations {
            debug!(context_key, operation, duration_ms, success = error.is_none(), "operation recorded");
        }

        if let Some(error) = error {
            self.record_alert(
                "operation_failure",
                &format!("{operation} failed: {error}"),
                Severity::Error,
            );
        }

        let threshold = settings.monitoring.operation_latency_ms;
        if duration_ms > threshold {
            self.record_alert(
                "high_latency",
                &format!("{operation} took {duration_ms}ms (threshold: {threshold}ms)"),
                Severity::Warning,
            );
        }
    }

    pub fn record_alert(&self, kind: &str, message: &str, severity: Severity) {
        let max_alerts = self.config.snapshot().diagnostics.max_alerts;
        {
            let mut state = self.lock();
            state.alerts.set_capacity(max_alerts);
            state.alerts.push(Alert {
                timestamp: epoch_millis(),
                kind: kind.to_string(),
                message: message.to_string(),
                severity,
            });
        }

        match severity {
            Severity::Info => info!(alert = kind, %severity, "{message}"),
            Severity::Warning => warn!(alert = kind, %severity, "{message}"),
            Severity::Error | Severity::Critical => error!(alert = kind, %severity, "{message}"),
        }
    }

    /// Newest `limit` operations, oldest first.
    pub fn operations(&self, limit: usize) -> Vec<OperationRecord> {
        self.lock().operations.recent(limit)
    }

    /// Newest `limit` alerts, oldest first.
    pub fn alerts(&self, limit: usize) -> Vec<Alert> {
        self.lock().alerts.recent(limit)
    }

    pub fn alert_count(&self) -> usize {
        self.lock().alerts.len()
    }

    pub fn last_alert(&self) -> Option<Alert> {
        self.lock().alerts.last().cloned()
    }

    /// Statistics over the last 100 operations.
    pub fn operation_stats(&self) -> OperationStats {
        let recent = self.lock().operations.recent(STATS_WINDOW);
        OperationStats::from_records(&recent)
    }

    // ── Memory ─────────────────────────────────────────────────────

    pub fn record_memory_snapshot(&self, usage: &vigil_core::MemoryUsage) {
        let samples = self.config.snapshot().memory.trend_tracking_samples;
        let sample = MemorySample::from_usage(usage, epoch_millis());
        let mut state = self.lock();
        state.memory.set_capacity(samples);
        state.memory.push(sample);
    }

    pub fn memory_trend(&self) -> MemoryTrend {
        let thresholds = LeakThresholds::from(&self.config.snapshot().memory);
        let samples = self.lock().memory.to_vec();
        trend::analyze(&samples, &thresholds)
    }

    /// Newest `limit` samples, oldest first.
    pub fn memory_history(&self, limit: usize) -> Vec<MemorySample> {
        self.lock().memory.recent(limit)
    }

    /// Sample the probe, record the sample, and grade it against the heap
    /// thresholds.
    pub fn memory_metrics(&self) -> MemoryMetrics {
        let settings = self.config.snapshot();
        let Some(usage) = self.probe.sample() else {
            debug!("memory probe returned no sample");
            return MemoryMetrics {
                available: false,
                heap_used_bytes: 0,
                heap_total_bytes: 0,
                heap_used_mb: 0,
                heap_total_mb: 0,
                heap_used_percent: 0,
                rss_mb: 0,
                external_mb: 0,
                is_warning: false,
                is_critical: false,
                trend: self.memory_trend(),
            };
        };

        self.record_memory_snapshot(&usage);
        let percent = usage.heap_used_percent();

        MemoryMetrics {
            available: true,
            heap_used_bytes: usage.heap_used_bytes,
            heap_total_bytes: usage.heap_total_bytes,
            heap_used_mb: trend::to_mb(usage.heap_used_bytes),
            heap_total_mb: trend::to_mb(usage.heap_total_bytes),
            heap_used_percent: percent.round() as u32,
            rss_mb: trend::to_mb(usage.rss_bytes),
            external_mb: trend::to_mb(usage.external_bytes),
            is_warning: percent > f64::from(settings.memory.heap_warning_threshold),
            is_critical: percent > f64::from(settings.memory.heap_critical_threshold),
            trend: self.memory_trend(),
        }
    }

    // ── Session leases ─────────────────────────────────────────────

    /// Track `key` for expiry. Without `ttl_minutes` the configured
    /// `sessions.sessionTtlMinutes` applies.
    pub fn register_session(&self, key: &str, ttl_minutes: Option<u64>) {
        let ttl_minutes =
            ttl_minutes.unwrap_or_else(|| self.config.snapshot().sessions.session_ttl_minutes);
        let ttl = Duration::from_secs(ttl_minutes.saturating_mul(60));
        self.lock().leases.register(key, ttl, Instant::now());
        debug!(session = key, ttl_minutes, "session lease registered");
    }

    pub fn remove_session(&self, key: &str) -> bool {
        self.lock().leases.remove(key)
    }

    pub fn expired_sessions(&self) -> Vec<String> {
        self.lock().leases.expired(Instant::now())
    }

    /// Drop expired leases, calling `on_expire` once per key after the lock
    /// is released.
    pub fn cleanup_expired_sessions(&self, mut on_expire: impl FnMut(&str)) -> Vec<String> {
        let expired = self.lock().leases.take_expired(Instant::now());
        for key in &expired {
            debug!(session = %key, "session lease expired");
            on_expire(key);
        }
        expired
    }

    // ── Auto-restart ledger ────────────────────────────────────────

    /// Ask for an automatic restart. Denied once `autoHealing.maxAutoRestarts`
    /// is exceeded inside `autoRestartResetHours`; a denial raises a
    /// `too_many_restarts` critical alert.
    pub fn record_auto_restart(&self) -> bool {
        let healing = self.config.snapshot().auto_healing;
        let window = Duration::from_secs(healing.auto_restart_reset_hours.saturating_mul(3600));
        let (permitted, count) = {
            let mut state = self.lock();
            let permitted = state.ledger.record(Instant::now(), healing.max_auto_restarts, window);
            (permitted, state.ledger.count())
        };

        if permitted {
            info!(count, max = healing.max_auto_restarts, "auto-restart permitted");
        } else {
            self.record_alert(
                "too_many_restarts",
                &format!(
                    "exceeded max auto-restarts ({count}/{}) within {}h",
                    healing.max_auto_restarts, healing.auto_restart_reset_hours
                ),
                Severity::Critical,
            );
        }
        permitted
    }

    pub fn auto_restart_count(&self) -> u32 {
        self.lock().ledger.count()
    }

    // ── Reports ────────────────────────────────────────────────────

    pub fn session_metrics(&self, pool: &dyn WorkerPool) -> SessionMetrics {
        self.session_metrics_from(&pool.metrics(), &pool.sessions())
    }

    /// Session metrics over one pool snapshot. The active count is the
    /// number of listed sessions.
    fn session_metrics_from(&self, metrics: &WorkerMetrics, sessions: &[SessionInfo]) -> SessionMetrics {
        let idle_ms = self
            .config
            .snapshot()
            .sessions
            .session_idle_timeout_minutes
            .saturating_mul(60_000);
        let now = epoch_millis();

        let mut total_error_count = 0u64;
        let mut total_request_count = 0u64;
        let session_details: Vec<SessionDetail> = sessions
            .iter()
            .map(|s| {
                total_error_count += s.error_count;
                total_request_count += s.request_count;
                let inactive_ms = now.saturating_sub(s.touched_at);
                SessionDetail {
                    key: s.key.clone(),
                    age_ms: now.saturating_sub(s.created_at),
                    inactive_ms,
                    error_count: s.error_count,
                    request_count: s.request_count,
                    is_stale: inactive_ms > idle_ms,
                }
            })
            .collect();

        let avg_error_rate = if total_request_count == 0 {
            0.0
        } else {
            total_error_count as f64 / total_request_count as f64
        };

        SessionMetrics {
            active_count: sessions.len() as u32,
            total_sessions: metrics.total_sessions,
            failed_sessions: metrics.failed_sessions,
            total_error_count,
            total_request_count,
            avg_error_rate,
            session_details,
        }
    }

    /// One report over a single `metrics()` / `sessions()` snapshot.
    pub fn health_report(&self, pool: &dyn WorkerPool) -> HealthReport {
        let worker = pool.metrics();
        let sessions = self.session_metrics_from(&worker, &pool.sessions());
        let memory = self.memory_metrics();
        let operations = self.operation_stats();
        let health_scores = HealthScores::compute(&worker, &memory, &operations);

        let (auto_restart_count, recent_alerts) = {
            let state = self.lock();
            (state.ledger.count(), state.alerts.recent(REPORT_ALERTS))
        };

        HealthReport {
            timestamp: epoch_millis(),
            uptime_ms: self.uptime().as_millis() as u64,
            overall_health: health_scores.overall(),
            health_scores,
            sessions,
            memory,
            operations,
            worker,
            auto_restart_count,
            recent_alerts,
        }
    }

    pub fn diagnostics_report(&self, pool: &dyn WorkerPool) -> DiagnosticsReport {
        let settings = self.config.snapshot();
        let performance = self.health_report(pool);
        let recommendations = generate_recommendations(&performance, &settings);
        DiagnosticsReport {
            generated_at: epoch_millis(),
            system: SystemInfo::current(performance.uptime_ms),
            worker: WorkerSummary {
                circuit_breaker_open: performance.worker.circuit_breaker_status.is_open(),
                consecutive_errors: performance.worker.consecutive_error_count,
                worker_restarts: performance.worker.browser_restarts,
                max_concurrent_sessions: settings.sessions.max_concurrent_sessions,
            },
            performance,
            recommendations,
        }
    }
}
