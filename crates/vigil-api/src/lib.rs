//! vigil-api — read-only diagnostics surface for a worker pool.
//!
//! # Routes
//!
//! All routes are mounted under `/health/worker`.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/status` | Coarse ok/degraded probe (200 / 503) |
//! | GET | `/detailed` | Full health report |
//! | GET | `/diagnostics` | Report, recommendations and process info |
//! | GET | `/logs?limit=` | Recent operations (default 50, max 200) |
//! | GET | `/alerts?limit=` | Recent alerts (default 20, max 100) |
//! | POST | `/restart` | Manual worker restart, token-gated |
//! | GET | `/memory/trend` | Memory history and leak verdict |
//! | GET | `/retry/strategies` | Retry strategy per error kind |
//! | GET | `/healing/status` | Auto-healer state |
//! | GET | `/captcha/status` | Captcha handler configuration |
//! | GET | `/recovery/status` | Recovery strategy catalog |
//! | GET | `/prometheus` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use vigil_core::{PolicyConfig, WorkerPool};
use vigil_heal::AutoHealer;
use vigil_health::HealthMonitor;
use vigil_recovery::{CaptchaError, CaptchaHandler, RecoveryCatalog};
use vigil_retry::RetryPolicy;

pub const BASE_PATH: &str = "/health/worker";

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<PolicyConfig>,
    pub monitor: Arc<HealthMonitor>,
    pub pool: Arc<dyn WorkerPool>,
    pub retry: RetryPolicy,
    pub recovery: Arc<RecoveryCatalog>,
    pub captcha: Arc<CaptchaHandler>,
    pub healer: Option<Arc<AutoHealer>>,
    /// Token required by `POST /restart`. `None` refuses every request.
    pub restart_token: Option<String>,
}

impl ApiState {
    /// State with the recovery catalog and captcha handler built from
    /// `config`, no healer, and restarts disabled.
    pub fn new(
        config: Arc<PolicyConfig>,
        monitor: Arc<HealthMonitor>,
        pool: Arc<dyn WorkerPool>,
    ) -> Result<Self, CaptchaError> {
        Ok(Self {
            retry: RetryPolicy::new(config.clone()),
            recovery: Arc::new(RecoveryCatalog::from_config(&config)),
            captcha: Arc::new(CaptchaHandler::from_config(&config)?),
            healer: None,
            restart_token: None,
            config,
            monitor,
            pool,
        })
    }

    pub fn with_healer(mut self, healer: Arc<AutoHealer>) -> Self {
        self.healer = Some(healer);
        self
    }

    pub fn with_restart_token(mut self, token: impl Into<String>) -> Self {
        self.restart_token = Some(token.into()).filter(|t: &String| !t.is_empty());
        self
    }
}

/// Build the diagnostics router, nested under [`BASE_PATH`].
pub fn build_router(state: ApiState) -> Router {
    let routes = Router::new()
        .route("/status", get(handlers::status))
        .route("/detailed", get(handlers::detailed))
        .route("/diagnostics", get(handlers::diagnostics))
        .route("/logs", get(handlers::logs))
        .route("/alerts", get(handlers::alerts))
        .route("/restart", post(handlers::restart))
        .route("/memory/trend", get(handlers::memory_trend))
        .route("/retry/strategies", get(handlers::retry_strategies))
        .route("/healing/status", get(handlers::healing_status))
        .route("/captcha/status", get(handlers::captcha_status))
        .route("/recovery/status", get(handlers::recovery_status))
        .route("/prometheus", get(handlers::prometheus_metrics))
        .with_state(state);

    Router::new().nest(BASE_PATH, routes)
}
