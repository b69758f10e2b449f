//! Resilient page operations built on the catalog.

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::catalog::RecoveryCatalog;
use crate::error::{RecoveryError, RecoveryResult};
use crate::page::{GotoOptions, NavigationResponse, PageHandle, ScreenshotOptions, WaitUntil};
use crate::strategy::{FailureMode, RecoveryContext};

const JS_ERRORS_SCRIPT: &str = "() => window.__jsErrors || []";
const OFFLINE_SCRIPT: &str = "() => !navigator.onLine";

#[derive(Debug, Clone, Copy, Default)]
pub struct NavigateOptions {
    /// Defaults to `recovery.navigationMaxRetries`.
    pub max_retries: Option<u32>,
    /// Defaults to `recovery.navigationTimeoutMs`.
    pub timeout: Option<Duration>,
    pub wait_until: WaitUntil,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationSuccess {
    pub response: Option<NavigationResponse>,
    /// Attempts used, rate-limit waits excluded.
    pub attempts: u32,
    pub rate_limit_waits: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScreenshotCapture {
    pub data: Bytes,
    /// True when only the minimal fallback capture succeeded.
    pub fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    BrowserDisconnected,
    JsError,
    HighMemory,
    Offline,
    DetectionFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedIssue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovered: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recoverable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DetectedIssue {
    fn new(kind: IssueKind) -> Self {
        Self {
            kind,
            count: None,
            recovered: None,
            recoverable: None,
            error: None,
        }
    }
}

/// Navigation failure family, from the lower-cased error text.
fn navigation_failure(message: &str) -> Option<FailureMode> {
    let lower = message.to_lowercase();
    if lower.contains("timeout") {
        Some(FailureMode::Timeout)
    } else if lower.contains("econnrefused") || lower.contains("enotfound") {
        Some(FailureMode::Network)
    } else {
        None
    }
}

impl RecoveryCatalog {
    /// Navigate to `url`, recovering from timeouts, network errors and 429s.
    ///
    /// A 429 waits per `Retry-After` and retries without using an attempt,
    /// up to `recovery.maxRateLimitWaits` times. Timeouts and network errors
    /// run their strategy and use an attempt. Any other failure, or an HTTP
    /// status of 400 or above, is returned immediately.
    pub async fn navigate_with_resilience(
        &self,
        page: &dyn PageHandle,
        url: &str,
        options: NavigateOptions,
    ) -> RecoveryResult<NavigationSuccess> {
        let max_attempts = options
            .max_retries
            .unwrap_or(self.settings.navigation_max_retries)
            .max(1);
        let timeout = options
            .timeout
            .unwrap_or(Duration::from_millis(self.settings.navigation_timeout_ms));
        let goto = GotoOptions::new(options.wait_until).with_timeout(timeout);

        let mut attempt = 1;
        let mut rate_limit_waits = 0;

        loop {
            let err = match page.goto(url, &goto).await {
                Ok(Some(resp)) if resp.status == 429 => {
                    rate_limit_waits += 1;
                    if rate_limit_waits > self.settings.max_rate_limit_waits {
                        warn!(url, waits = rate_limit_waits - 1, "giving up on rate-limited navigation");
                        return Err(RecoveryError::RateLimitExhausted {
                            waits: rate_limit_waits - 1,
                        });
                    }
                    let ctx = RecoveryContext::new()
                        .with_page(page)
                        .with_retry_after(resp.retry_after_secs());
                    self.recover(FailureMode::RateLimit, &ctx).await;
                    continue;
                }
                Ok(Some(resp)) if resp.status >= 400 => {
                    return Err(RecoveryError::Http {
                        status: resp.status,
                    });
                }
                Ok(response) => {
                    debug!(url, attempt, rate_limit_waits, "navigation succeeded");
                    return Ok(NavigationSuccess {
                        response,
                        attempts: attempt,
                        rate_limit_waits,
                    });
                }
                Err(err) => err,
            };

            let message = format!("{err:#}");
            let Some(mode) = navigation_failure(&message) else {
                return Err(RecoveryError::Page(err));
            };
            info!(url, attempt, max_attempts, %mode, "navigation failed");

            let ctx = RecoveryContext::new().with_page(page).with_error(&message);
            let outcome = self.recover(mode, &ctx).await;
            if !outcome.recovered {
                return Err(RecoveryError::Unrecovered {
                    mode,
                    reason: outcome.error.unwrap_or(message),
                });
            }
            if attempt >= max_attempts {
                return Err(RecoveryError::NavigationExhausted {
                    attempts: attempt,
                    last_error: message,
                });
            }
            attempt += 1;
        }
    }

    /// Capture a screenshot, falling back once to a minimal viewport
    /// capture without background.
    pub async fn screenshot_with_resilience(
        &self,
        page: &dyn PageHandle,
        options: ScreenshotOptions,
    ) -> RecoveryResult<ScreenshotCapture> {
        tokio::time::sleep(Duration::from_millis(self.settings.screenshot_settle_ms)).await;

        let limit = options
            .timeout
            .unwrap_or(Duration::from_millis(self.settings.screenshot_timeout_ms));
        let primary = ScreenshotOptions {
            timeout: Some(limit),
            ..options
        };
        let primary_error = match tokio::time::timeout(limit, page.screenshot(&primary)).await {
            Ok(Ok(data)) => return Ok(ScreenshotCapture { data, fallback: false }),
            Ok(Err(e)) => format!("{e:#}"),
            Err(_) => format!("timed out after {}ms", limit.as_millis()),
        };
        warn!(error = %primary_error, "screenshot failed, trying minimal capture");

        let minimal = ScreenshotOptions {
            full_page: false,
            omit_background: true,
            timeout: None,
        };
        match page.screenshot(&minimal).await {
            Ok(data) => Ok(ScreenshotCapture { data, fallback: true }),
            Err(e) => Err(RecoveryError::Screenshot {
                primary: primary_error,
                fallback: format!("{e:#}"),
            }),
        }
    }

    /// Probe a page for common broken states. Script errors trigger the
    /// JS error strategy.
    pub async fn detect_issues(&self, page: &dyn PageHandle) -> Vec<DetectedIssue> {
        let mut issues = Vec::new();

        if !page.is_connected() {
            issues.push(DetectedIssue {
                recovered: Some(false),
                ..DetectedIssue::new(IssueKind::BrowserDisconnected)
            });
        }

        let js_errors = match page.evaluate(JS_ERRORS_SCRIPT, Vec::new()).await {
            Ok(Value::Array(errors)) => errors.len(),
            _ => 0,
        };
        if js_errors > 0 {
            let outcome = self
                .recover(FailureMode::JsError, &RecoveryContext::new().with_page(page))
                .await;
            issues.push(DetectedIssue {
                count: Some(js_errors),
                recovered: Some(outcome.recovered),
                ..DetectedIssue::new(IssueKind::JsError)
            });
        }

        match page.metrics().await {
            Ok(metrics) if metrics.js_heap_used_size > self.settings.high_memory_bytes => {
                issues.push(DetectedIssue {
                    recoverable: Some(true),
                    ..DetectedIssue::new(IssueKind::HighMemory)
                });
            }
            Ok(_) => {}
            Err(e) => {
                return vec![DetectedIssue {
                    error: Some(format!("{e:#}")),
                    ..DetectedIssue::new(IssueKind::DetectionFailed)
                }];
            }
        }

        let offline = matches!(
            page.evaluate(OFFLINE_SCRIPT, Vec::new()).await,
            Ok(Value::Bool(true))
        );
        if offline {
            issues.push(DetectedIssue {
                recovered: Some(false),
                ..DetectedIssue::new(IssueKind::Offline)
            });
        }

        issues
    }
}
