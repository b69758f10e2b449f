//! Policy configuration: the validated tree of tunable thresholds.
//!
//! A [`PolicyConfig`] is built once at startup (defaults, optionally
//! overlaid by a TOML file or `VIGIL_*` environment overrides) and shared
//! behind an `Arc`. Runtime mutation goes through [`PolicyConfig::set`],
//! which validates the whole candidate tree before swapping it in; a
//! rejected update leaves the previous tree untouched.
//!
//! Paths are dotted and camelCase, mirroring the serialized form:
//!
//! ```text
//! sessions.maxConcurrentSessions
//! circuitBreaker.halfOpenAttempts
//! retry.strategies.TIMEOUT.maxRetries
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::types::ErrorKind;

/// Prefix for recognised environment overrides.
pub const ENV_PREFIX: &str = "VIGIL_";

/// Path of the only map-valued node; new keys may be created under it.
const STRATEGIES_PATH: &str = "retry.strategies";

// ── Settings tree ──────────────────────────────────────────────────

/// The full settings tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PolicySettings {
    pub monitoring: MonitoringSettings,
    pub sessions: SessionSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub retry: RetrySettings,
    pub memory: MemorySettings,
    pub diagnostics: DiagnosticsSettings,
    pub auto_healing: AutoHealingSettings,
    pub recovery: RecoverySettings,
    pub captcha: CaptchaSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct MonitoringSettings {
    /// Heap usage percentage considered worth alerting on.
    pub memory_usage_percent: u32,
    pub session_error_rate: f64,
    /// Operations slower than this raise a `high_latency` alert.
    pub operation_latency_ms: u64,
    pub inactive_session_minutes: u64,
    pub consecutive_errors_before_open: u32,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            memory_usage_percent: 80,
            session_error_rate: 0.3,
            operation_latency_ms: 30_000,
            inactive_session_minutes: 30,
            consecutive_errors_before_open: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct SessionSettings {
    pub max_concurrent_sessions: u32,
    /// Default lease length for `register_session`.
    pub session_ttl_minutes: u64,
    /// Sessions idle longer than this are reported as stale.
    pub session_idle_timeout_minutes: u64,
    pub stale_sweep_interval_seconds: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 10,
            session_ttl_minutes: 60,
            session_idle_timeout_minutes: 15,
            stale_sweep_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    pub open_threshold: u32,
    /// Half-open probes before escalating to a forced restart.
    pub half_open_attempts: u32,
    pub reset_timeout_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            open_threshold: 5,
            half_open_attempts: 3,
            reset_timeout_ms: 30_000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 300_000,
        }
    }
}

/// Per-kind retry override. Missing fields fall back to the global values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct StrategyOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
}

impl StrategyOverride {
    pub fn new(max_retries: u32, base_delay_ms: Option<u64>) -> Self {
        Self {
            max_retries: Some(max_retries),
            base_delay_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Fraction of the capped delay used as ± jitter (0.1 = ±10%).
    pub jitter_percent: f64,
    #[serde(deserialize_with = "deserialize_strategies")]
    pub strategies: BTreeMap<ErrorKind, StrategyOverride>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let strategies = BTreeMap::from([
            (ErrorKind::Timeout, StrategyOverride::new(4, Some(2_000))),
            (ErrorKind::Network, StrategyOverride::new(3, Some(1_500))),
            (ErrorKind::BrowserCrash, StrategyOverride::new(1, Some(5_000))),
            (ErrorKind::RateLimit, StrategyOverride::new(5, Some(3_000))),
            // Retrying a malformed input cannot succeed.
            (ErrorKind::InvalidUrl, StrategyOverride::new(0, None)),
        ]);
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_percent: 0.1,
            strategies,
        }
    }
}

/// Strategy keys arrive as plain strings from both TOML and JSON.
fn deserialize_strategies<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<ErrorKind, StrategyOverride>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, StrategyOverride>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            key.parse::<ErrorKind>()
                .map(|kind| (kind, value))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct MemorySettings {
    pub heap_warning_threshold: u32,
    pub heap_critical_threshold: u32,
    pub trend_tracking_window_ms: u64,
    /// Capacity of the memory sample ring.
    pub trend_tracking_samples: usize,
    pub auto_restart_on_critical: bool,
    /// Samples in the "recent" window of the leak heuristic.
    pub leak_recent_window: usize,
    pub leak_medium_slope: f64,
    pub leak_high_slope: f64,
    pub decreasing_slope: f64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            heap_warning_threshold: 80,
            heap_critical_threshold: 90,
            trend_tracking_window_ms: 300_000,
            trend_tracking_samples: 60,
            auto_restart_on_critical: true,
            leak_recent_window: 10,
            leak_medium_slope: 0.1,
            leak_high_slope: 0.3,
            decreasing_slope: -0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct DiagnosticsSettings {
    pub log_operations: bool,
    pub log_level: String,
    pub max_log_entries: usize,
    pub max_alerts: usize,
    pub enable_metrics_collection: bool,
    pub prometheus_enabled: bool,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            log_operations: true,
            log_level: "info".to_string(),
            max_log_entries: 1_000,
            max_alerts: 100,
            enable_metrics_collection: true,
            prometheus_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct AutoHealingSettings {
    pub enabled: bool,
    pub health_check_interval_seconds: u64,
    pub auto_restart_broken_browser: bool,
    pub max_auto_restarts: u32,
    pub auto_restart_reset_hours: u64,
    /// Share of `maxConcurrentSessions` that triggers a capacity alert.
    pub capacity_warning_ratio: f64,
}

impl Default for AutoHealingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            health_check_interval_seconds: 30,
            auto_restart_broken_browser: true,
            max_auto_restarts: 5,
            auto_restart_reset_hours: 24,
            capacity_warning_ratio: 0.95,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RecoverySettings {
    pub navigation_max_retries: u32,
    pub navigation_timeout_ms: u64,
    /// Grace period for the blank-page navigation after a timeout.
    pub timeout_grace_ms: u64,
    pub network_retry_delay_ms: u64,
    pub rate_limit_default_seconds: u64,
    pub rate_limit_max_seconds: u64,
    /// 429 responses tolerated per navigation before giving up.
    pub max_rate_limit_waits: u32,
    pub screenshot_timeout_ms: u64,
    pub screenshot_settle_ms: u64,
    pub high_memory_bytes: u64,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            navigation_max_retries: 3,
            navigation_timeout_ms: 30_000,
            timeout_grace_ms: 2_000,
            network_retry_delay_ms: 5_000,
            rate_limit_default_seconds: 30,
            rate_limit_max_seconds: 300,
            max_rate_limit_waits: 5,
            screenshot_timeout_ms: 10_000,
            screenshot_settle_ms: 500,
            high_memory_bytes: 1_000_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct CaptchaSettings {
    /// Solver name, or `"none"` for stealth-only handling.
    pub service: String,
    /// Base URL of the solving service.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub retries: u32,
}

impl Default for CaptchaSettings {
    fn default() -> Self {
        Self {
            service: "none".to_string(),
            endpoint: None,
            api_key: None,
            timeout_ms: 120_000,
            poll_interval_ms: 5_000,
            retries: 3,
        }
    }
}

impl CaptchaSettings {
    pub fn solver_enabled(&self) -> bool {
        self.service != "none" && self.endpoint.is_some()
    }
}

// ── Validation ─────────────────────────────────────────────────────

/// Check every invariant and return all violations.
pub fn validate(settings: &PolicySettings) -> Vec<String> {
    let mut errors = Vec::new();

    if settings.sessions.max_concurrent_sessions < 1 {
        errors.push("sessions.maxConcurrentSessions must be >= 1".to_string());
    }
    let mem_pct = settings.monitoring.memory_usage_percent;
    if !(50..=100).contains(&mem_pct) {
        errors.push(format!(
            "monitoring.memoryUsagePercent must be between 50-100 (got {mem_pct})"
        ));
    }
    if settings.circuit_breaker.open_threshold < 1 {
        errors.push("circuitBreaker.openThreshold must be >= 1".to_string());
    }
    if settings.memory.heap_warning_threshold >= settings.memory.heap_critical_threshold {
        errors.push(format!(
            "memory.heapWarningThreshold ({}) must be < memory.heapCriticalThreshold ({})",
            settings.memory.heap_warning_threshold, settings.memory.heap_critical_threshold
        ));
    }
    if settings.diagnostics.max_log_entries < 1 {
        errors.push("diagnostics.maxLogEntries must be >= 1".to_string());
    }
    if settings.diagnostics.max_alerts < 1 {
        errors.push("diagnostics.maxAlerts must be >= 1".to_string());
    }
    if settings.memory.trend_tracking_samples < 2 {
        errors.push("memory.trendTrackingSamples must be >= 2".to_string());
    }
    if settings.memory.leak_recent_window < 1 {
        errors.push("memory.leakRecentWindow must be >= 1".to_string());
    }
    let m = &settings.memory;
    if !(m.decreasing_slope < m.leak_medium_slope && m.leak_medium_slope < m.leak_high_slope) {
        errors.push(
            "memory slopes must satisfy decreasingSlope < leakMediumSlope < leakHighSlope".to_string(),
        );
    }
    let jitter = settings.retry.jitter_percent;
    if !(0.0..=1.0).contains(&jitter) {
        errors.push(format!("retry.jitterPercent must be within 0-1 (got {jitter})"));
    }
    if settings.retry.backoff_multiplier < 1.0 {
        errors.push("retry.backoffMultiplier must be >= 1".to_string());
    }
    if settings.retry.max_delay_ms < 1 {
        errors.push("retry.maxDelayMs must be >= 1".to_string());
    }
    if settings.auto_healing.health_check_interval_seconds < 1 {
        errors.push("autoHealing.healthCheckIntervalSeconds must be >= 1".to_string());
    }
    let ratio = settings.auto_healing.capacity_warning_ratio;
    if !(ratio > 0.0 && ratio <= 1.0) {
        errors.push(format!("autoHealing.capacityWarningRatio must be within (0, 1] (got {ratio})"));
    }
    if settings.captcha.poll_interval_ms < 1 {
        errors.push("captcha.pollIntervalMs must be >= 1".to_string());
    }

    errors
}

// ── Environment overrides ──────────────────────────────────────────

/// How an override's raw string is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Float,
    Bool,
    Text,
    Json,
}

/// A recognised environment key and the config path it targets.
#[derive(Debug, Clone, Copy)]
pub struct EnvOverride {
    pub key: &'static str,
    pub path: &'static str,
    pub kind: ValueKind,
}

const fn env(key: &'static str, path: &'static str, kind: ValueKind) -> EnvOverride {
    EnvOverride { key, path, kind }
}

/// Every environment key that `load_from_environment` understands.
pub const ENV_OVERRIDES: &[EnvOverride] = &[
    env("VIGIL_MEMORY_USAGE_PERCENT", "monitoring.memoryUsagePercent", ValueKind::Integer),
    env("VIGIL_SESSION_ERROR_RATE", "monitoring.sessionErrorRate", ValueKind::Float),
    env("VIGIL_OPERATION_LATENCY_MS", "monitoring.operationLatencyMs", ValueKind::Integer),
    env("VIGIL_MAX_CONCURRENT_SESSIONS", "sessions.maxConcurrentSessions", ValueKind::Integer),
    env("VIGIL_SESSION_TTL_MINUTES", "sessions.sessionTtlMinutes", ValueKind::Integer),
    env("VIGIL_SESSION_IDLE_TIMEOUT_MINUTES", "sessions.sessionIdleTimeoutMinutes", ValueKind::Integer),
    env("VIGIL_CIRCUIT_BREAKER_ENABLED", "circuitBreaker.enabled", ValueKind::Bool),
    env("VIGIL_CIRCUIT_BREAKER_OPEN_THRESHOLD", "circuitBreaker.openThreshold", ValueKind::Integer),
    env("VIGIL_CIRCUIT_BREAKER_HALF_OPEN_ATTEMPTS", "circuitBreaker.halfOpenAttempts", ValueKind::Integer),
    env("VIGIL_RETRY_MAX_RETRIES", "retry.maxRetries", ValueKind::Integer),
    env("VIGIL_RETRY_BASE_DELAY_MS", "retry.baseDelayMs", ValueKind::Integer),
    env("VIGIL_RETRY_MAX_DELAY_MS", "retry.maxDelayMs", ValueKind::Integer),
    env("VIGIL_RETRY_BACKOFF_MULTIPLIER", "retry.backoffMultiplier", ValueKind::Float),
    env("VIGIL_RETRY_JITTER_PERCENT", "retry.jitterPercent", ValueKind::Float),
    env("VIGIL_RETRY_STRATEGIES", "retry.strategies", ValueKind::Json),
    env("VIGIL_HEAP_WARNING_THRESHOLD", "memory.heapWarningThreshold", ValueKind::Integer),
    env("VIGIL_HEAP_CRITICAL_THRESHOLD", "memory.heapCriticalThreshold", ValueKind::Integer),
    env("VIGIL_TREND_TRACKING_SAMPLES", "memory.trendTrackingSamples", ValueKind::Integer),
    env("VIGIL_AUTO_RESTART_ON_CRITICAL", "memory.autoRestartOnCritical", ValueKind::Bool),
    env("VIGIL_LOG_OPERATIONS", "diagnostics.logOperations", ValueKind::Bool),
    env("VIGIL_LOG_LEVEL", "diagnostics.logLevel", ValueKind::Text),
    env("VIGIL_MAX_LOG_ENTRIES", "diagnostics.maxLogEntries", ValueKind::Integer),
    env("VIGIL_MAX_ALERTS", "diagnostics.maxAlerts", ValueKind::Integer),
    env("VIGIL_AUTO_HEALING_ENABLED", "autoHealing.enabled", ValueKind::Bool),
    env("VIGIL_HEALTH_CHECK_INTERVAL_SECONDS", "autoHealing.healthCheckIntervalSeconds", ValueKind::Integer),
    env("VIGIL_MAX_AUTO_RESTARTS", "autoHealing.maxAutoRestarts", ValueKind::Integer),
    env("VIGIL_AUTO_RESTART_RESET_HOURS", "autoHealing.autoRestartResetHours", ValueKind::Integer),
    env("VIGIL_NAVIGATION_TIMEOUT_MS", "recovery.navigationTimeoutMs", ValueKind::Integer),
    env("VIGIL_NAVIGATION_MAX_RETRIES", "recovery.navigationMaxRetries", ValueKind::Integer),
    env("VIGIL_CAPTCHA_SERVICE", "captcha.service", ValueKind::Text),
    env("VIGIL_CAPTCHA_ENDPOINT", "captcha.endpoint", ValueKind::Text),
    env("VIGIL_CAPTCHA_API_KEY", "captcha.apiKey", ValueKind::Text),
    env("VIGIL_CAPTCHA_TIMEOUT_MS", "captcha.timeoutMs", ValueKind::Integer),
    env("VIGIL_CAPTCHA_POLL_INTERVAL_MS", "captcha.pollIntervalMs", ValueKind::Integer),
];

/// Parse a raw override according to its declared kind.
pub fn parse_override(kind: ValueKind, raw: &str) -> Result<Value, String> {
    let trimmed = raw.trim();
    match kind {
        ValueKind::Integer => trimmed
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| format!("expected an integer: {e}")),
        ValueKind::Float => {
            let n: f64 = trimmed.parse().map_err(|e| format!("expected a number: {e}"))?;
            serde_json::Number::from_f64(n)
                .map(Value::Number)
                .ok_or_else(|| "expected a finite number".to_string())
        }
        ValueKind::Bool => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
            other => Err(format!("expected a boolean, got {other:?}")),
        },
        ValueKind::Text => Ok(Value::String(raw.to_string())),
        ValueKind::Json => serde_json::from_str(trimmed).map_err(|e| format!("expected JSON: {e}")),
    }
}

// ── PolicyConfig ───────────────────────────────────────────────────

/// Process-wide, validated policy configuration.
#[derive(Debug)]
pub struct PolicyConfig {
    settings: RwLock<PolicySettings>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            settings: RwLock::new(PolicySettings::default()),
        }
    }
}

impl PolicyConfig {
    /// Build a config from an explicit tree, failing on any violation.
    pub fn new(settings: PolicySettings) -> ConfigResult<Self> {
        let errors = validate(&settings);
        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors));
        }
        Ok(Self {
            settings: RwLock::new(settings),
        })
    }

    /// Defaults deep-merged with a partial TOML document. Tables merge key
    /// by key, so a single strategy field leaves the other kinds intact.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        // Typed pass first: unknown keys and bad types report with TOML spans.
        let _: PolicySettings = toml::from_str(content)?;
        let overlay: Value = toml::from_str(content)?;

        let mut tree = to_tree(&PolicySettings::default())?;
        merge_tree(&mut tree, overlay);
        let settings = from_tree(tree, "<toml>")?;
        Self::new(settings)
    }

    pub fn from_toml_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "policy config loaded from file");
        Ok(config)
    }

    /// Defaults overlaid by recognised `VIGIL_*` variables from the process
    /// environment.
    pub fn load_from_environment() -> ConfigResult<Self> {
        Self::from_env_iter(std::env::vars())
    }

    /// Defaults overlaid by recognised `VIGIL_*` pairs, validated once.
    pub fn from_env_iter<I, K, V>(vars: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut tree = to_tree(&PolicySettings::default())?;

        for (key, raw) in vars {
            let key = key.as_ref();
            if !key.starts_with(ENV_PREFIX) {
                continue;
            }
            let Some(spec) = ENV_OVERRIDES.iter().find(|o| o.key == key) else {
                warn!(%key, "ignoring unrecognised environment override");
                continue;
            };
            let value = parse_override(spec.kind, raw.as_ref()).map_err(|reason| {
                ConfigError::Override {
                    key: key.to_string(),
                    reason,
                }
            })?;
            match tree.pointer_mut(&json_pointer(spec.path)) {
                Some(node) => merge_tree(node, value),
                None => apply_path(&mut tree, spec.path, value)?,
            }
            debug!(%key, path = spec.path, "applied environment override");
        }

        let settings = from_tree(tree, "<environment>")?;
        Self::new(settings)
    }

    /// Typed copy of the current tree.
    pub fn snapshot(&self) -> PolicySettings {
        self.read().clone()
    }

    /// Look up a dotted path. `None` if the path does not exist.
    pub fn get(&self, path: &str) -> Option<Value> {
        let tree = to_tree(&self.read()).ok()?;
        let mut node = &tree;
        for segment in path.split('.') {
            node = node.as_object()?.get(segment)?;
        }
        Some(node.clone())
    }

    /// Set a dotted path and re-validate the whole tree. On failure the
    /// previous tree is retained.
    pub fn set(&self, path: &str, value: Value) -> ConfigResult<()> {
        let mut guard = self.write();
        let mut tree = to_tree(&guard)?;
        apply_path(&mut tree, path, value)?;
        let candidate = from_tree(tree, path)?;

        let errors = validate(&candidate);
        if !errors.is_empty() {
            warn!(%path, violations = errors.len(), "rejected policy config update");
            return Err(ConfigError::Validation(errors));
        }

        *guard = candidate;
        info!(%path, "policy config updated");
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, PolicySettings> {
        self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PolicySettings> {
        self.settings.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn to_tree(settings: &PolicySettings) -> ConfigResult<Value> {
    serde_json::to_value(settings).map_err(|e| ConfigError::TypeMismatch {
        path: String::new(),
        reason: e.to_string(),
    })
}

fn from_tree(tree: Value, path: &str) -> ConfigResult<PolicySettings> {
    serde_json::from_value(tree).map_err(|e| ConfigError::TypeMismatch {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Merge `overlay` into `base`. Objects merge recursively, anything else
/// replaces the base value.
fn merge_tree(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_tree(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn json_pointer(path: &str) -> String {
    format!("/{}", path.replace('.', "/"))
}

/// Write `value` at `path` inside a serialized tree. Only existing keys may
/// be replaced, except under the strategies map where new kinds can be added.
fn apply_path(tree: &mut Value, path: &str, value: Value) -> ConfigResult<()> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(ConfigError::UnknownPath(path.to_string()));
    }

    let mut node = tree;
    for (depth, segment) in segments.iter().enumerate() {
        let parent_path = segments[..depth].join(".");
        let is_last = depth + 1 == segments.len();
        let map = node
            .as_object_mut()
            .ok_or_else(|| ConfigError::UnknownPath(path.to_string()))?;

        if !map.contains_key(*segment) {
            let under_strategies = parent_path == STRATEGIES_PATH
                || parent_path.starts_with(&format!("{STRATEGIES_PATH}."));
            if !under_strategies {
                return Err(ConfigError::UnknownPath(path.to_string()));
            }
            map.insert((*segment).to_string(), Value::Object(Default::default()));
        }

        if is_last {
            map.insert((*segment).to_string(), value);
            return Ok(());
        }
        node = map
            .get_mut(*segment)
            .ok_or_else(|| ConfigError::UnknownPath(path.to_string()))?;
    }

    Err(ConfigError::UnknownPath(path.to_string()))
}
