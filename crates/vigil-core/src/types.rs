//! Domain types shared across Vigil crates.
//!
//! These describe what Vigil observes about a worker pool (metrics,
//! sessions, memory) and how it classifies failures. The pool itself is
//! owned by the embedding application and reached only through
//! [`WorkerPool`].

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};

// ── Error classification ───────────────────────────────────────────

/// Failure category used to pick a retry strategy and a recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Timeout,
    Network,
    BrowserCrash,
    RateLimit,
    InvalidUrl,
    Unknown,
}

impl ErrorKind {
    /// The kinds a classifier can positively identify, in rule order.
    pub const CLASSIFIED: [ErrorKind; 5] = [
        ErrorKind::Timeout,
        ErrorKind::Network,
        ErrorKind::BrowserCrash,
        ErrorKind::RateLimit,
        ErrorKind::InvalidUrl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Network => "NETWORK",
            ErrorKind::BrowserCrash => "BROWSER_CRASH",
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::InvalidUrl => "INVALID_URL",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TIMEOUT" => Ok(ErrorKind::Timeout),
            "NETWORK" => Ok(ErrorKind::Network),
            "BROWSER_CRASH" => Ok(ErrorKind::BrowserCrash),
            "RATE_LIMIT" => Ok(ErrorKind::RateLimit),
            "INVALID_URL" => Ok(ErrorKind::InvalidUrl),
            "UNKNOWN" => Ok(ErrorKind::Unknown),
            other => Err(format!("unknown error kind: {other}")),
        }
    }
}

// ── Worker pool ────────────────────────────────────────────────────

/// Circuit breaker state as reported by the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    #[default]
    Closed,
    Open,
}

impl CircuitStatus {
    pub fn is_open(self) -> bool {
        self == CircuitStatus::Open
    }
}

/// Point-in-time counters reported by a [`WorkerPool`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerMetrics {
    pub active_sessions: u32,
    pub total_sessions: u64,
    pub failed_sessions: u64,
    pub succeeded_operations: u64,
    pub failed_operations: u64,
    pub browser_restarts: u64,
    pub circuit_breaker_status: CircuitStatus,
    pub consecutive_error_count: u32,
    /// Whether the underlying worker (e.g. the browser process) is up.
    pub healthy: bool,
}

/// A live session as seen by the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub key: String,
    /// Unix timestamp (milliseconds) when the session was created.
    pub created_at: u64,
    /// Unix timestamp (milliseconds) of the last request on the session.
    pub touched_at: u64,
    pub error_count: u64,
    pub request_count: u64,
}

/// The pool of worker sessions Vigil keeps healthy.
///
/// Implemented by the embedding application. `metrics` and `sessions` are
/// expected to be cheap snapshots; `restart_worker` may take a while and may
/// fail.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    fn metrics(&self) -> WorkerMetrics;

    fn sessions(&self) -> Vec<SessionInfo>;

    /// Restart the underlying worker. Returns whether the restart succeeded.
    async fn restart_worker(&self) -> anyhow::Result<bool>;
}

// ── Memory sampling ────────────────────────────────────────────────

/// Raw memory counters, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub heap_used_bytes: u64,
    pub heap_total_bytes: u64,
    pub rss_bytes: u64,
    pub external_bytes: u64,
}

impl MemoryUsage {
    /// Heap usage as a percentage of the heap total (0 when total is 0).
    pub fn heap_used_percent(&self) -> f64 {
        if self.heap_total_bytes == 0 {
            return 0.0;
        }
        self.heap_used_bytes as f64 / self.heap_total_bytes as f64 * 100.0
    }
}

/// Source of memory samples.
pub trait MemoryProbe: Send + Sync {
    /// Take a sample. `None` means memory could not be read this time.
    fn sample(&self) -> Option<MemoryUsage>;
}

/// Memory probe for the current process.
///
/// A native process has no managed heap, so the resident set is reported
/// as "heap used" and total system memory as "heap total".
pub struct ProcessMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn sample(&self) -> Option<MemoryUsage> {
        let pid = self.pid?;
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();
        system.refresh_process(pid);
        let process = system.process(pid)?;
        let rss = process.memory();
        Some(MemoryUsage {
            heap_used_bytes: rss,
            heap_total_bytes: system.total_memory(),
            rss_bytes: rss,
            external_bytes: process.virtual_memory().saturating_sub(rss),
        })
    }
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
