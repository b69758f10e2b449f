//! Vigil health monitoring.
//!
//! [`HealthMonitor`] is the single owner of operation and alert history,
//! memory samples, session leases and the auto-restart ledger. It turns
//! them, plus a [`vigil_core::WorkerPool`] snapshot, into a scored
//! [`HealthReport`].

pub mod leases;
pub mod ledger;
pub mod monitor;
pub mod report;
pub mod ring;
pub mod trend;

pub use monitor::HealthMonitor;
pub use report::{
    Alert, DiagnosticsReport, HealthReport, HealthScores, MemoryMetrics, OperationRecord,
    OperationStats, SessionMetrics, Severity, generate_recommendations,
};
pub use trend::{MemorySample, MemoryTrend, RiskLevel, Trend};
