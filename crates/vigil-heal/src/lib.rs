//! vigil-heal — closed-loop auto-healing.
//!
//! [`AutoHealer`] ticks on `autoHealing.healthCheckIntervalSeconds`, reads
//! the [`vigil_health::HealthMonitor`] report for a worker pool and reacts
//! through [`HealingHooks`]:
//!
//! ```text
//! tick ─► breaker open?      ─► reset attempt ×N ─► forced restart
//!      ─► heap critical?     ─► ledger permit    ─► on_critical_memory
//!      ─► leak risk high?    ─► alert            ─► on_memory_leak
//!      ─► leases expired?    ─► on_session_expiry per key
//!      ─► near capacity?     ─► alert
//! ```

pub mod healer;
pub mod hooks;

pub use healer::{AutoHealer, CIRCUIT_BREAKER_KEY, HealingAction, HealingState, HealingTick};
pub use hooks::{HealingHooks, NoopHooks};
