//! Typed failure recovery strategies.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use vigil_core::ErrorKind;
use vigil_core::config::RecoverySettings;

use crate::page::{GotoOptions, PageHandle, WaitUntil};

/// Failure category a strategy recovers from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    Timeout,
    Network,
    BrowserCrash,
    RateLimit,
    JsError,
    MemoryPressure,
}

impl FailureMode {
    pub const ALL: [FailureMode; 6] = [
        FailureMode::Timeout,
        FailureMode::Network,
        FailureMode::BrowserCrash,
        FailureMode::RateLimit,
        FailureMode::JsError,
        FailureMode::MemoryPressure,
    ];

    /// Recovery mode for a classified error. Invalid URLs and unknown
    /// errors have no recovery.
    pub fn from_error_kind(kind: ErrorKind) -> Option<Self> {
        match kind {
            ErrorKind::Timeout => Some(FailureMode::Timeout),
            ErrorKind::Network => Some(FailureMode::Network),
            ErrorKind::BrowserCrash => Some(FailureMode::BrowserCrash),
            ErrorKind::RateLimit => Some(FailureMode::RateLimit),
            ErrorKind::InvalidUrl | ErrorKind::Unknown => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureMode::Timeout => "timeout",
            FailureMode::Network => "network",
            FailureMode::BrowserCrash => "browser_crash",
            FailureMode::RateLimit => "rate_limit",
            FailureMode::JsError => "js_error",
            FailureMode::MemoryPressure => "memory_pressure",
        }
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a strategy did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    PageBlank,
    RetryAfterDelay,
    RestartBrowser,
    RateLimitWait,
    PageReload,
    BrowserRestart,
    /// Nothing was attempted.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryOutcome {
    pub recovered: bool,
    pub action: RecoveryAction,
    pub requires_restart: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waited_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecoveryOutcome {
    pub fn recovered(action: RecoveryAction) -> Self {
        Self {
            recovered: true,
            action,
            requires_restart: false,
            waited_secs: None,
            error: None,
        }
    }

    pub fn failed(action: RecoveryAction, error: impl Into<String>) -> Self {
        Self {
            recovered: false,
            action,
            requires_restart: false,
            waited_secs: None,
            error: Some(error.into()),
        }
    }
}

/// Inputs available to a strategy. Strategies that need something the
/// context lacks report "not recovered".
#[derive(Clone, Copy, Default)]
pub struct RecoveryContext<'a> {
    pub page: Option<&'a dyn PageHandle>,
    pub error: Option<&'a str>,
    pub retry_after_secs: Option<u64>,
}

impl<'a> RecoveryContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: &'a dyn PageHandle) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_error(mut self, error: &'a str) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_retry_after(mut self, secs: Option<u64>) -> Self {
        self.retry_after_secs = secs;
        self
    }
}

#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn mode(&self) -> FailureMode;

    async fn recover(&self, ctx: &RecoveryContext<'_>) -> RecoveryOutcome;
}

const NO_PAGE: &str = "no page available";

// ── Timeout ────────────────────────────────────────────────────────

/// Abandons a stuck navigation by loading `about:blank`. A blank load that
/// is still running when the grace period ends counts as recovered.
#[derive(Debug, Clone)]
pub struct TimeoutRecovery {
    grace: Duration,
}

impl TimeoutRecovery {
    pub fn new(settings: &RecoverySettings) -> Self {
        Self {
            grace: Duration::from_millis(settings.timeout_grace_ms),
        }
    }
}

#[async_trait]
impl RecoveryStrategy for TimeoutRecovery {
    fn mode(&self) -> FailureMode {
        FailureMode::Timeout
    }

    async fn recover(&self, ctx: &RecoveryContext<'_>) -> RecoveryOutcome {
        let Some(page) = ctx.page else {
            return RecoveryOutcome::failed(RecoveryAction::PageBlank, NO_PAGE);
        };
        let options = GotoOptions::new(WaitUntil::Load);
        match tokio::time::timeout(self.grace, page.goto("about:blank", &options)).await {
            Ok(Ok(_)) => RecoveryOutcome::recovered(RecoveryAction::PageBlank),
            Err(_) => {
                debug!(grace_ms = self.grace.as_millis() as u64, "blank navigation still pending");
                RecoveryOutcome::recovered(RecoveryAction::PageBlank)
            }
            Ok(Err(e)) => RecoveryOutcome::failed(RecoveryAction::PageBlank, format!("{e:#}")),
        }
    }
}

// ── Network ────────────────────────────────────────────────────────

const TRANSIENT_NETWORK: [&str; 4] = ["ECONNREFUSED", "ENOTFOUND", "ETIMEDOUT", "ERR_NETWORK"];

/// Waits out transient network errors.
#[derive(Debug, Clone)]
pub struct NetworkRecovery {
    delay: Duration,
}

impl NetworkRecovery {
    pub fn new(settings: &RecoverySettings) -> Self {
        Self {
            delay: Duration::from_millis(settings.network_retry_delay_ms),
        }
    }

    pub fn is_transient(message: &str) -> bool {
        let upper = message.to_uppercase();
        TRANSIENT_NETWORK.iter().any(|n| upper.contains(n))
    }
}

#[async_trait]
impl RecoveryStrategy for NetworkRecovery {
    fn mode(&self) -> FailureMode {
        FailureMode::Network
    }

    async fn recover(&self, ctx: &RecoveryContext<'_>) -> RecoveryOutcome {
        let message = ctx.error.unwrap_or_default();
        if !Self::is_transient(message) {
            return RecoveryOutcome::failed(RecoveryAction::None, message);
        }
        debug!(delay_ms = self.delay.as_millis() as u64, "waiting out network error");
        tokio::time::sleep(self.delay).await;
        RecoveryOutcome::recovered(RecoveryAction::RetryAfterDelay)
    }
}

// ── Browser crash ──────────────────────────────────────────────────

/// A crashed worker cannot be recovered in place.
#[derive(Debug, Clone, Default)]
pub struct CrashRecovery;

#[async_trait]
impl RecoveryStrategy for CrashRecovery {
    fn mode(&self) -> FailureMode {
        FailureMode::BrowserCrash
    }

    async fn recover(&self, _ctx: &RecoveryContext<'_>) -> RecoveryOutcome {
        RecoveryOutcome {
            recovered: false,
            action: RecoveryAction::RestartBrowser,
            requires_restart: true,
            waited_secs: None,
            error: None,
        }
    }
}

// ── Rate limit ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RateLimitRecovery {
    default_secs: u64,
    max_secs: u64,
}

impl RateLimitRecovery {
    pub fn new(settings: &RecoverySettings) -> Self {
        Self {
            default_secs: settings.rate_limit_default_seconds,
            max_secs: settings.rate_limit_max_seconds,
        }
    }

    /// Seconds to wait for a given `Retry-After`; zero or missing falls
    /// back to the default.
    pub fn wait_secs(&self, retry_after: Option<u64>) -> u64 {
        retry_after
            .filter(|secs| *secs > 0)
            .unwrap_or(self.default_secs)
            .min(self.max_secs)
    }
}

#[async_trait]
impl RecoveryStrategy for RateLimitRecovery {
    fn mode(&self) -> FailureMode {
        FailureMode::RateLimit
    }

    async fn recover(&self, ctx: &RecoveryContext<'_>) -> RecoveryOutcome {
        let wait = self.wait_secs(ctx.retry_after_secs);
        info!(wait_secs = wait, "rate limited, waiting");
        tokio::time::sleep(Duration::from_secs(wait)).await;
        RecoveryOutcome {
            waited_secs: Some(wait),
            ..RecoveryOutcome::recovered(RecoveryAction::RateLimitWait)
        }
    }
}

// ── JS error ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct JsErrorRecovery;

#[async_trait]
impl RecoveryStrategy for JsErrorRecovery {
    fn mode(&self) -> FailureMode {
        FailureMode::JsError
    }

    async fn recover(&self, ctx: &RecoveryContext<'_>) -> RecoveryOutcome {
        let Some(page) = ctx.page else {
            return RecoveryOutcome::failed(RecoveryAction::PageReload, NO_PAGE);
        };
        match page.reload(&GotoOptions::new(WaitUntil::DomContentLoaded)).await {
            Ok(()) => RecoveryOutcome::recovered(RecoveryAction::PageReload),
            Err(e) => {
                warn!(error = %e, "page reload after script error failed");
                RecoveryOutcome::failed(RecoveryAction::PageReload, format!("{e:#}"))
            }
        }
    }
}

// ── Memory pressure ────────────────────────────────────────────────

/// Releases the worker resource so the pool can start a fresh one.
#[derive(Debug, Clone, Default)]
pub struct MemoryPressureRecovery;

#[async_trait]
impl RecoveryStrategy for MemoryPressureRecovery {
    fn mode(&self) -> FailureMode {
        FailureMode::MemoryPressure
    }

    async fn recover(&self, ctx: &RecoveryContext<'_>) -> RecoveryOutcome {
        let Some(page) = ctx.page else {
            return RecoveryOutcome::failed(RecoveryAction::BrowserRestart, NO_PAGE);
        };
        match page.close().await {
            Ok(()) => RecoveryOutcome::recovered(RecoveryAction::BrowserRestart),
            Err(e) => RecoveryOutcome::failed(RecoveryAction::BrowserRestart, format!("{e:#}")),
        }
    }
}
