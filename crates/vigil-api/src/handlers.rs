//! Diagnostics handlers.
//!
//! Every handler reads from the monitor, pool or policy engines held in
//! [`ApiState`] and returns JSON, except `/prometheus`.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use vigil_core::{CircuitStatus, epoch_millis};
use vigil_heal::HealingState;
use vigil_health::{Alert, MemoryMetrics, MemorySample, MemoryTrend, RiskLevel, Severity};
use vigil_recovery::{CaptchaKind, CaptchaStatus, CatalogStatus};
use vigil_retry::RetryInfo;

use crate::ApiState;

const TOKEN_HEADER: &str = "x-health-token";
/// Memory samples returned by `/memory/trend`.
const TREND_HISTORY: usize = 20;
/// Overall score below which `/status` reports degraded.
const HEALTHY_SCORE: u32 = 75;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// `?limit=`; missing, unparseable or zero falls back to the default.
#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<String>,
}

impl LimitQuery {
    fn resolve(&self, default: usize, max: usize) -> usize {
        self.limit
            .as_deref()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(default)
            .min(max)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

// ── Health ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBody {
    pub status: &'static str,
    pub timestamp: u64,
    pub health: u32,
    pub circuit: CircuitStatus,
    pub active_sessions: u32,
    pub uptime_ms: u64,
}

/// GET /health/worker/status
pub async fn status(State(state): State<ApiState>) -> impl IntoResponse {
    let report = state.monitor.health_report(state.pool.as_ref());
    let circuit = report.worker.circuit_breaker_status;
    let healthy = report.overall_health >= HEALTHY_SCORE && !circuit.is_open();

    let body = StatusBody {
        status: if healthy { "ok" } else { "degraded" },
        timestamp: report.timestamp,
        health: report.overall_health,
        circuit,
        active_sessions: report.sessions.active_count,
        uptime_ms: report.uptime_ms,
    };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, ApiResponse::ok(body))
}

/// GET /health/worker/detailed
pub async fn detailed(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.monitor.health_report(state.pool.as_ref()))
}

/// GET /health/worker/diagnostics
pub async fn diagnostics(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.monitor.diagnostics_report(state.pool.as_ref()))
}

// ── Logs ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub limit: usize,
    pub count: usize,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    fn new(limit: usize, items: Vec<T>) -> Self {
        Self {
            limit,
            count: items.len(),
            items,
        }
    }
}

/// GET /health/worker/logs
pub async fn logs(State(state): State<ApiState>, Query(query): Query<LimitQuery>) -> impl IntoResponse {
    let limit = query.resolve(50, 200);
    ApiResponse::ok(Page::new(limit, state.monitor.operations(limit)))
}

/// GET /health/worker/alerts
pub async fn alerts(
    State(state): State<ApiState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.resolve(20, 100);
    ApiResponse::ok(Page::new(limit, state.monitor.alerts(limit)))
}

// ── Restart ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartBody {
    pub restarted: bool,
    pub timestamp: u64,
}

/// POST /health/worker/restart
pub async fn restart(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> impl IntoResponse {
    let presented = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(query.token);

    let authorized = match (&state.restart_token, &presented) {
        (Some(expected), Some(given)) => expected == given,
        _ => false,
    };
    if !authorized {
        warn!(token_presented = presented.is_some(), "manual restart refused");
        return error_response("unauthorized", StatusCode::UNAUTHORIZED).into_response();
    }

    info!("manual worker restart requested");
    match state.pool.restart_worker().await {
        Ok(restarted) => {
            state.monitor.record_alert(
                "manual_restart",
                &format!("manual worker restart requested (restarted: {restarted})"),
                Severity::Info,
            );
            ApiResponse::ok(RestartBody {
                restarted,
                timestamp: epoch_millis(),
            })
            .into_response()
        }
        Err(e) => {
            let msg = format!("{e:#}");
            error!(error = %msg, "manual worker restart failed");
            error_response(&msg, StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

// ── Memory ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LeakVerdict {
    Ok,
    Monitor,
    Restart,
}

impl From<RiskLevel> for LeakVerdict {
    fn from(risk: RiskLevel) -> Self {
        match risk {
            RiskLevel::Low => LeakVerdict::Ok,
            RiskLevel::Medium => LeakVerdict::Monitor,
            RiskLevel::High => LeakVerdict::Restart,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeakAnalysis {
    pub is_leaking: bool,
    pub risk_level: RiskLevel,
    pub recommended_action: LeakVerdict,
}

#[derive(Debug, Serialize)]
pub struct MemoryTrendBody {
    pub current: MemoryMetrics,
    pub trend: MemoryTrend,
    pub history: Vec<MemorySample>,
    pub analysis: LeakAnalysis,
}

/// GET /health/worker/memory/trend
pub async fn memory_trend(State(state): State<ApiState>) -> impl IntoResponse {
    let current = state.monitor.memory_metrics();
    let trend = current.trend;
    ApiResponse::ok(MemoryTrendBody {
        history: state.monitor.memory_history(TREND_HISTORY),
        analysis: LeakAnalysis {
            is_leaking: trend.risk_level != RiskLevel::Low,
            risk_level: trend.risk_level,
            recommended_action: trend.risk_level.into(),
        },
        trend,
        current,
    })
}

// ── Policies ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StrategiesBody {
    pub strategies: Vec<RetryInfo>,
    pub timestamp: u64,
}

/// GET /health/worker/retry/strategies
pub async fn retry_strategies(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(StrategiesBody {
        strategies: state.retry.strategy_table(),
        timestamp: epoch_millis(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSummary {
    pub auto_restart_count: u32,
    pub alert_count: usize,
    pub last_alert: Option<Alert>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingBody {
    pub auto_healing: HealingState,
    pub monitor: MonitorSummary,
    pub timestamp: u64,
}

/// GET /health/worker/healing/status
pub async fn healing_status(State(state): State<ApiState>) -> impl IntoResponse {
    let auto_healing = match &state.healer {
        Some(healer) => healer.state(),
        None => HealingState {
            enabled: false,
            is_health_check_running: false,
            cb_reset_attempts: Default::default(),
        },
    };
    ApiResponse::ok(HealingBody {
        auto_healing,
        monitor: MonitorSummary {
            auto_restart_count: state.monitor.auto_restart_count(),
            alert_count: state.monitor.alert_count(),
            last_alert: state.monitor.last_alert(),
        },
        timestamp: epoch_millis(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptchaBody {
    #[serde(flatten)]
    pub status: CaptchaStatus,
    pub supported_types: Vec<CaptchaKind>,
    pub timestamp: u64,
}

/// GET /health/worker/captcha/status
pub async fn captcha_status(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(CaptchaBody {
        status: state.captcha.status(),
        supported_types: CaptchaKind::SOLVABLE.to_vec(),
        timestamp: epoch_millis(),
    })
}

#[derive(Debug, Serialize)]
pub struct RecoveryBody {
    #[serde(flatten)]
    pub catalog: CatalogStatus,
    pub timestamp: u64,
}

/// GET /health/worker/recovery/status
pub async fn recovery_status(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(RecoveryBody {
        catalog: state.recovery.status(),
        timestamp: epoch_millis(),
    })
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /health/worker/prometheus
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    if !state.config.snapshot().diagnostics.prometheus_enabled {
        return error_response("prometheus exposition disabled", StatusCode::NOT_FOUND)
            .into_response();
    }

    let report = state.monitor.health_report(state.pool.as_ref());
    let body = vigil_metrics::render_prometheus(&report, state.monitor.alert_count());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::body::to_bytes;
    use axum::http::HeaderValue;
    use serde_json::{Value, json};
    use vigil_core::{
        MemoryProbe, MemoryUsage, PolicyConfig, SessionInfo, WorkerMetrics, WorkerPool,
    };
    use vigil_heal::{AutoHealer, NoopHooks};
    use vigil_health::HealthMonitor;

    const MB: u64 = 1024 * 1024;

    struct Pool {
        metrics: Mutex<WorkerMetrics>,
        restarts: AtomicU32,
        fail_restart: bool,
    }

    impl Pool {
        fn healthy() -> Self {
            Self {
                metrics: Mutex::new(WorkerMetrics {
                    active_sessions: 2,
                    healthy: true,
                    ..Default::default()
                }),
                restarts: AtomicU32::new(0),
                fail_restart: false,
            }
        }
    }

    #[async_trait]
    impl WorkerPool for Pool {
        fn metrics(&self) -> WorkerMetrics {
            self.metrics.lock().unwrap().clone()
        }
        /// One live session per counted active session.
        fn sessions(&self) -> Vec<SessionInfo> {
            let now = epoch_millis();
            let active = self.metrics.lock().unwrap().active_sessions;
            (0..active)
                .map(|i| SessionInfo {
                    key: format!("chat-{i}"),
                    created_at: now,
                    touched_at: now,
                    error_count: 0,
                    request_count: 0,
                })
                .collect()
        }
        async fn restart_worker(&self) -> anyhow::Result<bool> {
            if self.fail_restart {
                anyhow::bail!("browser binary missing");
            }
            self.restarts.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    struct Heap(Mutex<Vec<u64>>);

    impl MemoryProbe for Heap {
        fn sample(&self) -> Option<MemoryUsage> {
            let mut mbs = self.0.lock().unwrap();
            let mb = if mbs.len() > 1 { mbs.remove(0) } else { *mbs.first()? };
            Some(MemoryUsage {
                heap_used_bytes: mb * MB,
                heap_total_bytes: 1000 * MB,
                rss_bytes: mb * MB,
                external_bytes: 0,
            })
        }
    }

    fn state_with(pool: Pool, heap: Vec<u64>) -> (ApiState, Arc<Pool>) {
        let config = Arc::new(PolicyConfig::default());
        let monitor = Arc::new(HealthMonitor::new(config.clone(), Arc::new(Heap(Mutex::new(heap)))));
        let pool = Arc::new(pool);
        let state = ApiState::new(config, monitor, pool.clone()).unwrap();
        (state, pool)
    }

    fn test_state() -> ApiState {
        state_with(Pool::healthy(), vec![100]).0
    }

    async fn json_body(resp: axum::response::Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn status_ok_when_healthy() {
        let resp = status(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "ok");
        assert_eq!(body["data"]["health"], 100);
        assert_eq!(body["data"]["circuit"], "closed");
        assert_eq!(body["data"]["activeSessions"], 2);
    }

    #[tokio::test]
    async fn status_degraded_when_breaker_open() {
        let pool = Pool::healthy();
        pool.metrics.lock().unwrap().circuit_breaker_status = CircuitStatus::Open;
        let (state, _) = state_with(pool, vec![100]);

        let resp = status(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(resp).await;
        assert_eq!(body["data"]["status"], "degraded");
        assert_eq!(body["data"]["health"], 75);
    }

    #[tokio::test]
    async fn status_and_detailed_agree_on_active_sessions() {
        let state = test_state();
        let status_body = json_body(status(State(state.clone())).await.into_response()).await;
        let detailed_body = json_body(detailed(State(state)).await.into_response()).await;
        assert_eq!(status_body["data"]["activeSessions"], 2);
        assert_eq!(
            status_body["data"]["activeSessions"],
            detailed_body["data"]["sessions"]["activeCount"]
        );
    }

    #[tokio::test]
    async fn detailed_includes_scores() {
        let resp = detailed(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["data"]["healthScores"]["circuitBreaker"], 100);
        assert_eq!(body["data"]["overallHealth"], 100);
    }

    #[tokio::test]
    async fn diagnostics_includes_recommendations() {
        let resp = diagnostics(State(test_state())).await.into_response();
        let body = json_body(resp).await;
        let lines = body["data"]["recommendations"].as_array().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].as_str().unwrap().starts_with("OK:"));
    }

    #[tokio::test]
    async fn logs_limit_is_clamped() {
        let state = test_state();
        for i in 0..5 {
            state.monitor.record_operation("chat:1", &format!("op{i}"), 10, None);
        }

        let query = LimitQuery {
            limit: Some("2".into()),
        };
        let body = json_body(logs(State(state.clone()), Query(query)).await.into_response()).await;
        assert_eq!(body["data"]["limit"], 2);
        assert_eq!(body["data"]["count"], 2);
        assert_eq!(body["data"]["items"][1]["operation"], "op4");

        let query = LimitQuery {
            limit: Some("5000".into()),
        };
        let body = json_body(logs(State(state.clone()), Query(query)).await.into_response()).await;
        assert_eq!(body["data"]["limit"], 200);
        assert_eq!(body["data"]["count"], 5);

        let query = LimitQuery {
            limit: Some("bogus".into()),
        };
        let body = json_body(logs(State(state), Query(query)).await.into_response()).await;
        assert_eq!(body["data"]["limit"], 50);
    }

    #[tokio::test]
    async fn alerts_default_limit() {
        let state = test_state();
        state.monitor.record_alert("high_latency", "slow", Severity::Warning);
        let body = json_body(
            alerts(State(state), Query(LimitQuery::default()))
                .await
                .into_response(),
        )
        .await;
        assert_eq!(body["data"]["limit"], 20);
        assert_eq!(body["data"]["items"][0]["type"], "high_latency");
        assert_eq!(body["data"]["items"][0]["severity"], "warning");
    }

    #[tokio::test]
    async fn restart_refused_without_configured_token() {
        let (state, pool) = state_with(Pool::healthy(), vec![100]);
        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, HeaderValue::from_static("anything"));

        let resp = restart(State(state), headers, Query(TokenQuery::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(pool.restarts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn restart_with_wrong_token_is_refused() {
        let (state, pool) = state_with(Pool::healthy(), vec![100]);
        let state = state.with_restart_token("s3cret");
        let query = TokenQuery {
            token: Some("guess".into()),
        };

        let resp = restart(State(state), HeaderMap::new(), Query(query))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(pool.restarts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn restart_accepts_header_or_query_token() {
        let (state, pool) = state_with(Pool::healthy(), vec![100]);
        let state = state.with_restart_token("s3cret");

        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, HeaderValue::from_static("s3cret"));
        let resp = restart(State(state.clone()), headers, Query(TokenQuery::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["data"]["restarted"], true);

        let query = TokenQuery {
            token: Some("s3cret".into()),
        };
        let resp = restart(State(state.clone()), HeaderMap::new(), Query(query))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        assert_eq!(pool.restarts.load(Ordering::SeqCst), 2);
        assert_eq!(state.monitor.last_alert().unwrap().kind, "manual_restart");
    }

    #[tokio::test]
    async fn restart_failure_is_a_server_error() {
        let pool = Pool {
            fail_restart: true,
            ..Pool::healthy()
        };
        let (state, _) = state_with(pool, vec![100]);
        let state = state.with_restart_token("s3cret");
        let query = TokenQuery {
            token: Some("s3cret".into()),
        };

        let resp = restart(State(state), HeaderMap::new(), Query(query))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("browser binary missing"));
    }

    #[tokio::test]
    async fn memory_trend_recommends_restart_on_steep_growth() {
        let (state, _) = state_with(Pool::healthy(), vec![100, 200]);
        state.monitor.memory_metrics();

        let body = json_body(memory_trend(State(state)).await.into_response()).await;
        let data = &body["data"];
        assert_eq!(data["history"].as_array().unwrap().len(), 2);
        assert_eq!(data["trend"]["trend"], "increasing");
        assert_eq!(data["analysis"]["isLeaking"], true);
        assert_eq!(data["analysis"]["recommendedAction"], "RESTART");
    }

    #[tokio::test]
    async fn memory_trend_ok_with_flat_heap() {
        let (state, _) = state_with(Pool::healthy(), vec![100]);
        state.monitor.memory_metrics();
        let body = json_body(memory_trend(State(state)).await.into_response()).await;
        assert_eq!(body["data"]["analysis"]["recommendedAction"], "OK");
        assert_eq!(body["data"]["analysis"]["isLeaking"], false);
    }

    #[tokio::test]
    async fn retry_strategies_lists_classified_kinds() {
        let body =
            json_body(retry_strategies(State(test_state())).await.into_response()).await;
        let strategies = body["data"]["strategies"].as_array().unwrap();
        assert_eq!(strategies.len(), 5);
        let invalid = strategies
            .iter()
            .find(|s| s["errorKind"] == "INVALID_URL")
            .unwrap();
        assert_eq!(invalid["maxRetries"], 0);
        assert_eq!(invalid["estimatedDelaysMs"], json!([]));
    }

    #[tokio::test]
    async fn healing_status_without_healer() {
        let body = json_body(healing_status(State(test_state())).await.into_response()).await;
        assert_eq!(body["data"]["autoHealing"]["enabled"], false);
        assert_eq!(body["data"]["monitor"]["alertCount"], 0);
        assert_eq!(body["data"]["monitor"]["lastAlert"], Value::Null);
    }

    #[tokio::test]
    async fn healing_status_reports_healer_state() {
        let (state, pool) = state_with(Pool::healthy(), vec![100]);
        let healer = Arc::new(AutoHealer::new(
            state.config.clone(),
            state.monitor.clone(),
            pool,
            Arc::new(NoopHooks),
        ));
        let state = state.with_healer(healer);

        let body = json_body(healing_status(State(state)).await.into_response()).await;
        assert_eq!(body["data"]["autoHealing"]["enabled"], true);
        assert_eq!(body["data"]["autoHealing"]["isHealthCheckRunning"], false);
        assert_eq!(body["data"]["autoHealing"]["cbResetAttempts"], json!({}));
    }

    #[tokio::test]
    async fn captcha_status_without_solver() {
        let body = json_body(captcha_status(State(test_state())).await.into_response()).await;
        assert_eq!(body["data"]["solverEnabled"], false);
        assert_eq!(body["data"]["supportedTypes"].as_array().unwrap().len(), CaptchaKind::SOLVABLE.len());
    }

    #[tokio::test]
    async fn recovery_status_lists_six_strategies() {
        let body = json_body(recovery_status(State(test_state())).await.into_response()).await;
        assert_eq!(body["data"]["strategiesAvailable"], 6);
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let resp = prometheus_metrics(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("vigil_worker_health_score 100"));
    }

    #[tokio::test]
    async fn prometheus_can_be_disabled() {
        let state = test_state();
        state
            .config
            .set("diagnostics.prometheusEnabled", json!(false))
            .unwrap();
        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
