//! The auto-healing controller.
//!
//! One background task drives [`AutoHealer::perform_health_check`] at
//! `autoHealing.healthCheckIntervalSeconds`. Ticks never overlap: the
//! interval skips missed ticks and a try-lock rejects a manual check that
//! races a scheduled one.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use vigil_core::{PolicyConfig, PolicySettings, WorkerPool};
use vigil_health::{HealthMonitor, RiskLevel, Severity};

use crate::hooks::HealingHooks;

/// Key under which breaker reset attempts are counted.
pub const CIRCUIT_BREAKER_KEY: &str = "circuit_breaker_reset";

/// Something the healer did during one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HealingAction {
    CircuitBreakerResetAttempt { attempt: u32, max: u32 },
    /// Reset attempts exhausted. `permitted` is whether a restart was granted.
    CircuitBreakerRestart { permitted: bool },
    /// The breaker was seen closed with attempts outstanding.
    CircuitBreakerTrackingCleared,
    CriticalMemoryRestart { permitted: bool },
    MemoryLeakDetected { slope: f64 },
    SessionExpired { key: String },
    CapacityWarning { active: u32, max: u32 },
    HookFailed { hook: &'static str, error: String },
}

/// Outcome of one health check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingTick {
    pub overall_health: u32,
    pub actions: Vec<HealingAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingState {
    pub enabled: bool,
    pub is_health_check_running: bool,
    pub cb_reset_attempts: BTreeMap<String, u32>,
}

struct Runner {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

pub struct AutoHealer {
    config: Arc<PolicyConfig>,
    monitor: Arc<HealthMonitor>,
    pool: Arc<dyn WorkerPool>,
    hooks: Arc<dyn HealingHooks>,
    cb_reset_attempts: Mutex<BTreeMap<String, u32>>,
    tick: tokio::sync::Mutex<()>,
    runner: Mutex<Option<Runner>>,
}

impl AutoHealer {
    pub fn new(
        config: Arc<PolicyConfig>,
        monitor: Arc<HealthMonitor>,
        pool: Arc<dyn WorkerPool>,
        hooks: Arc<dyn HealingHooks>,
    ) -> Self {
        Self {
            config,
            monitor,
            pool,
            hooks,
            cb_reset_attempts: Mutex::new(BTreeMap::new()),
            tick: tokio::sync::Mutex::new(()),
            runner: Mutex::new(None),
        }
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    fn attempts(&self) -> MutexGuard<'_, BTreeMap<String, u32>> {
        self.cb_reset_attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn runner(&self) -> MutexGuard<'_, Option<Runner>> {
        self.runner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Scheduling ─────────────────────────────────────────────────

    /// Spawn the periodic health check loop.
    ///
    /// Returns `false` without spawning when auto-healing is disabled or
    /// the loop is already running.
    pub fn start_health_checks(self: &Arc<Self>) -> bool {
        let healing = self.config.snapshot().auto_healing;
        if !healing.enabled {
            debug!("auto-healing disabled; health checks not started");
            return false;
        }

        let mut runner = self.runner();
        if runner.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let period = Duration::from_secs(healing.health_check_interval_seconds.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let healer = Arc::clone(self);
        let handle = tokio::spawn(async move {
            healer.run(period, shutdown_rx).await;
        });
        *runner = Some(Runner {
            handle,
            shutdown_tx,
        });

        info!(interval_secs = period.as_secs(), "auto-healing health checks started");
        true
    }

    /// Stop the loop. A tick already in progress runs to completion.
    /// Returns whether a loop had been started.
    pub fn stop_health_checks(&self) -> bool {
        let Some(runner) = self.runner().take() else {
            return false;
        };
        let _ = runner.shutdown_tx.send(true);
        info!("auto-healing health checks stopped");
        true
    }

    async fn run(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(tick) = self.perform_health_check().await {
                        debug!(
                            overall_health = tick.overall_health,
                            actions = tick.actions.len(),
                            "health check complete"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    debug!("health check loop shutting down");
                    break;
                }
            }
        }
    }

    // ── The tick ───────────────────────────────────────────────────

    /// Run one health check and react to what it finds.
    ///
    /// Returns `None` when another check is still in progress.
    pub async fn perform_health_check(&self) -> Option<HealingTick> {
        let Ok(_guard) = self.tick.try_lock() else {
            debug!("previous health check still running; skipping");
            return None;
        };

        let settings = self.config.snapshot();
        let report = self.monitor.health_report(self.pool.as_ref());
        let mut actions = Vec::new();

        if report.worker.circuit_breaker_status.is_open() {
            self.recover_circuit_breaker(&settings, &mut actions).await;
        } else if self.clear_breaker_tracking() {
            debug!("circuit breaker closed; reset tracking cleared");
            actions.push(HealingAction::CircuitBreakerTrackingCleared);
        }

        if report.memory.is_critical && settings.memory.auto_restart_on_critical {
            let permitted = self.monitor.record_auto_restart();
            actions.push(HealingAction::CriticalMemoryRestart { permitted });
            if permitted {
                warn!(
                    heap_used_percent = report.memory.heap_used_percent,
                    "critical heap usage; requesting worker restart"
                );
                self.run_hook(
                    "on_critical_memory",
                    self.hooks.on_critical_memory(self.pool.as_ref()),
                    &mut actions,
                )
                .await;
            }
        }

        let trend = report.memory.trend;
        if trend.risk_level == RiskLevel::High {
            self.monitor.record_alert(
                "memory_leak_detected",
                &format!("memory leak trend detected: {}% growth", trend.slope_percent()),
                Severity::Error,
            );
            actions.push(HealingAction::MemoryLeakDetected { slope: trend.slope });
            self.run_hook(
                "on_memory_leak",
                self.hooks.on_memory_leak(self.pool.as_ref()),
                &mut actions,
            )
            .await;
        }

        let expired = self.monitor.cleanup_expired_sessions(|_| {});
        if !expired.is_empty() {
            info!(count = expired.len(), "cleaned up expired sessions");
        }
        for key in expired {
            self.run_hook("on_session_expiry", self.hooks.on_session_expiry(&key), &mut actions)
                .await;
            actions.push(HealingAction::SessionExpired { key });
        }

        let active = report.sessions.active_count;
        let max = settings.sessions.max_concurrent_sessions;
        if f64::from(active) >= f64::from(max) * settings.auto_healing.capacity_warning_ratio {
            self.monitor.record_alert(
                "session_capacity_warning",
                &format!("approaching session limit: {active}/{max}"),
                Severity::Warning,
            );
            actions.push(HealingAction::CapacityWarning { active, max });
        }

        Some(HealingTick {
            overall_health: report.overall_health,
            actions,
        })
    }

    /// Probe the breaker up to `circuitBreaker.halfOpenAttempts` times, then
    /// escalate to a forced restart and start counting again.
    async fn recover_circuit_breaker(
        &self,
        settings: &PolicySettings,
        actions: &mut Vec<HealingAction>,
    ) {
        let max = settings.circuit_breaker.half_open_attempts;
        let attempt = {
            let mut attempts = self.attempts();
            let current = attempts.get(CIRCUIT_BREAKER_KEY).copied().unwrap_or(0);
            if current < max {
                attempts.insert(CIRCUIT_BREAKER_KEY.to_string(), current + 1);
                Some(current + 1)
            } else {
                attempts.remove(CIRCUIT_BREAKER_KEY);
                None
            }
        };

        if let Some(attempt) = attempt {
            info!(attempt, max, "attempting circuit breaker reset");
            self.monitor.record_alert(
                "circuit_breaker_reset_attempt",
                &format!("attempting to close circuit breaker (attempt {attempt}/{max})"),
                Severity::Info,
            );
            actions.push(HealingAction::CircuitBreakerResetAttempt { attempt, max });
            self.run_hook(
                "on_circuit_breaker_reset",
                self.hooks.on_circuit_breaker_reset(self.pool.as_ref()),
                actions,
            )
            .await;
            return;
        }

        warn!(max, "circuit breaker stuck open; forcing worker restart");
        self.monitor.record_alert(
            "circuit_breaker_restart",
            "circuit breaker unable to recover, forcing worker restart",
            Severity::Critical,
        );

        if !settings.auto_healing.auto_restart_broken_browser {
            info!("automatic restart of a broken worker is disabled");
            actions.push(HealingAction::CircuitBreakerRestart { permitted: false });
            return;
        }

        let permitted = self.monitor.record_auto_restart();
        actions.push(HealingAction::CircuitBreakerRestart { permitted });
        if permitted {
            self.run_hook(
                "on_worker_restart",
                self.hooks.on_worker_restart(self.pool.as_ref()),
                actions,
            )
            .await;
        }
    }

    async fn run_hook(
        &self,
        hook: &'static str,
        call: impl Future<Output = anyhow::Result<()>>,
        actions: &mut Vec<HealingAction>,
    ) {
        if let Err(e) = call.await {
            let error = format!("{e:#}");
            warn!(hook, %error, "healing hook failed");
            self.monitor.record_alert(
                "healing_hook_failed",
                &format!("{hook} failed: {error}"),
                Severity::Error,
            );
            actions.push(HealingAction::HookFailed { hook, error });
        }
    }

    fn clear_breaker_tracking(&self) -> bool {
        self.attempts()
            .remove(CIRCUIT_BREAKER_KEY)
            .is_some_and(|n| n > 0)
    }

    // ── Introspection ──────────────────────────────────────────────

    pub fn reset_circuit_breaker_tracking(&self) {
        self.attempts().clear();
    }

    pub fn state(&self) -> HealingState {
        let is_health_check_running = self
            .runner()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished());
        HealingState {
            enabled: self.config.snapshot().auto_healing.enabled,
            is_health_check_running,
            cb_reset_attempts: self.attempts().clone(),
        }
    }
}
