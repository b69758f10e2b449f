//! Recovery callbacks invoked by the auto-healer.

use async_trait::async_trait;

use vigil_core::WorkerPool;

/// Actions the embedding application takes when the healer decides to act.
///
/// Every method defaults to doing nothing. An error is logged and recorded
/// as a `healing_hook_failed` alert; it never aborts the tick.
#[async_trait]
pub trait HealingHooks: Send + Sync {
    /// Heap is critical and the restart ledger granted a permit.
    async fn on_critical_memory(&self, _pool: &dyn WorkerPool) -> anyhow::Result<()> {
        Ok(())
    }

    /// The memory trend shows high leak risk.
    async fn on_memory_leak(&self, _pool: &dyn WorkerPool) -> anyhow::Result<()> {
        Ok(())
    }

    /// The breaker is open; try moving it to half-open.
    async fn on_circuit_breaker_reset(&self, _pool: &dyn WorkerPool) -> anyhow::Result<()> {
        Ok(())
    }

    /// Reset attempts are used up and a restart permit was granted.
    async fn on_worker_restart(&self, _pool: &dyn WorkerPool) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once for each session whose lease expired.
    async fn on_session_expiry(&self, _session_key: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hooks that only observe.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

#[async_trait]
impl HealingHooks for NoopHooks {}
