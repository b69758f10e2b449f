//! A breaker that never recovers is probed `halfOpenAttempts` times and
//! then escalated to exactly one forced restart.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use vigil_core::{
    CircuitStatus, MemoryProbe, MemoryUsage, PolicyConfig, SessionInfo, WorkerMetrics, WorkerPool,
};
use vigil_heal::{AutoHealer, CIRCUIT_BREAKER_KEY, HealingAction, HealingHooks};
use vigil_health::HealthMonitor;

struct StuckOpen;

#[async_trait]
impl WorkerPool for StuckOpen {
    fn metrics(&self) -> WorkerMetrics {
        WorkerMetrics {
            circuit_breaker_status: CircuitStatus::Open,
            consecutive_error_count: 9,
            healthy: true,
            ..Default::default()
        }
    }

    fn sessions(&self) -> Vec<SessionInfo> {
        Vec::new()
    }

    async fn restart_worker(&self) -> anyhow::Result<bool> {
        Ok(true)
    }
}

struct QuietHeap;

impl MemoryProbe for QuietHeap {
    fn sample(&self) -> Option<MemoryUsage> {
        Some(MemoryUsage {
            heap_used_bytes: 64 << 20,
            heap_total_bytes: 512 << 20,
            rss_bytes: 128 << 20,
            external_bytes: 0,
        })
    }
}

#[derive(Default)]
struct Hooks {
    resets: AtomicU32,
    restarts: AtomicU32,
}

#[async_trait]
impl HealingHooks for Hooks {
    async fn on_circuit_breaker_reset(&self, _pool: &dyn WorkerPool) -> anyhow::Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_worker_restart(&self, pool: &dyn WorkerPool) -> anyhow::Result<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        pool.restart_worker().await?;
        Ok(())
    }
}

#[tokio::test]
async fn fourth_open_tick_forces_a_single_restart() {
    let config = Arc::new(PolicyConfig::default());
    let monitor = Arc::new(HealthMonitor::new(config.clone(), Arc::new(QuietHeap)));
    let hooks = Arc::new(Hooks::default());
    let healer = AutoHealer::new(config, monitor.clone(), Arc::new(StuckOpen), hooks.clone());

    for attempt in 1..=3 {
        let tick = healer.perform_health_check().await.unwrap();
        assert_eq!(
            tick.actions,
            vec![HealingAction::CircuitBreakerResetAttempt { attempt, max: 3 }]
        );
        assert_eq!(healer.state().cb_reset_attempts[CIRCUIT_BREAKER_KEY], attempt);
    }
    assert_eq!(hooks.resets.load(Ordering::SeqCst), 3);
    assert_eq!(hooks.restarts.load(Ordering::SeqCst), 0);

    let tick = healer.perform_health_check().await.unwrap();
    assert_eq!(
        tick.actions,
        vec![HealingAction::CircuitBreakerRestart { permitted: true }]
    );
    assert_eq!(hooks.restarts.load(Ordering::SeqCst), 1);
    assert!(healer.state().cb_reset_attempts.is_empty());
    assert_eq!(monitor.auto_restart_count(), 1);

    let kinds: Vec<String> = monitor.alerts(100).into_iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![
            "circuit_breaker_reset_attempt",
            "circuit_breaker_reset_attempt",
            "circuit_breaker_reset_attempt",
            "circuit_breaker_restart",
        ]
    );

    // The cycle starts over on the next open tick.
    let tick = healer.perform_health_check().await.unwrap();
    assert_eq!(
        tick.actions,
        vec![HealingAction::CircuitBreakerResetAttempt { attempt: 1, max: 3 }]
    );
}
