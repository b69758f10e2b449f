//! Captcha detection and handling.
//!
//! Without a solver only stealth measures are applied. With one, the site
//! key is extracted, the task is submitted, the solver is polled until it
//! returns a token, and the token is injected back into the page.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use vigil_core::PolicyConfig;
use vigil_core::config::CaptchaSettings;

use crate::error::CaptchaError;
use crate::page::PageHandle;
use crate::solver::{CaptchaSolver, HttpCaptchaSolver, SolveRequest, TaskStatus};

const DETECT_SCRIPT: &str = r#"() => {
  if (window.grecaptcha) {
    const box = document.querySelector('.g-recaptcha');
    return box && box.getAttribute('data-size') === 'invisible' ? 'recaptcha_v3' : 'recaptcha_v2';
  }
  if (window.hcaptcha || document.querySelector('.h-captcha')) return 'hcaptcha';
  if (window.turnstile || document.querySelector('.cf-turnstile, [data-captcha-type="cloudflare"]')) {
    return 'cloudflare_turnstile';
  }
  const text = document.body ? document.body.textContent : '';
  if (text.includes('Verify you are human') || text.includes('challenge')) return 'unknown_challenge';
  return null;
}"#;

const SITE_KEY_SCRIPT: &str = r#"() => {
  const el = document.querySelector('[data-sitekey]');
  if (el) return el.getAttribute('data-sitekey');
  const box = document.querySelector('.g-recaptcha, .h-captcha, .cf-turnstile');
  return box ? box.getAttribute('data-sitekey') : null;
}"#;

const STEALTH_SCRIPT: &str = r#"() => {
  Object.defineProperty(navigator, 'webdriver', { get: () => false });
}"#;

const EXECUTE_V3_SCRIPT: &str = r#"() => {
  if (window.grecaptcha && window.grecaptcha.ready) {
    window.grecaptcha.ready(() => window.grecaptcha.execute());
    return true;
  }
  return false;
}"#;

const INJECT_SCRIPT: &str = r#"(token) => {
  for (const name of ['g-recaptcha-response', 'h-captcha-response', 'cf-turnstile-response']) {
    document.querySelectorAll(`[name="${name}"]`).forEach((el) => { el.value = token; });
  }
  const box = document.querySelector('[data-callback]');
  const callback = box && window[box.getAttribute('data-callback')];
  if (typeof callback === 'function') { callback(token); return true; }
  const form = document.querySelector('form');
  if (form) { form.submit(); return true; }
  return false;
}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptchaKind {
    RecaptchaV2,
    RecaptchaV3,
    Hcaptcha,
    CloudflareTurnstile,
    UnknownChallenge,
}

impl CaptchaKind {
    /// Kinds an external solver can be asked to solve.
    pub const SOLVABLE: [CaptchaKind; 4] = [
        CaptchaKind::RecaptchaV2,
        CaptchaKind::RecaptchaV3,
        CaptchaKind::Hcaptcha,
        CaptchaKind::CloudflareTurnstile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CaptchaKind::RecaptchaV2 => "recaptcha_v2",
            CaptchaKind::RecaptchaV3 => "recaptcha_v3",
            CaptchaKind::Hcaptcha => "hcaptcha",
            CaptchaKind::CloudflareTurnstile => "cloudflare_turnstile",
            CaptchaKind::UnknownChallenge => "unknown_challenge",
        }
    }
}

impl fmt::Display for CaptchaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptchaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recaptcha_v2" => Ok(CaptchaKind::RecaptchaV2),
            "recaptcha_v3" => Ok(CaptchaKind::RecaptchaV3),
            "hcaptcha" => Ok(CaptchaKind::Hcaptcha),
            "cloudflare_turnstile" => Ok(CaptchaKind::CloudflareTurnstile),
            "unknown_challenge" => Ok(CaptchaKind::UnknownChallenge),
            other => Err(format!("unknown captcha kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptchaOutcome {
    pub detected: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<CaptchaKind>,
    pub solved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CaptchaOutcome {
    fn not_detected() -> Self {
        Self {
            detected: false,
            kind: None,
            solved: false,
            method: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptchaStatus {
    pub service: String,
    pub solver_enabled: bool,
    pub solver: Option<String>,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub retries: u32,
}

pub struct CaptchaHandler {
    settings: CaptchaSettings,
    solver: Option<Arc<dyn CaptchaSolver>>,
}

impl CaptchaHandler {
    /// Uses the HTTP solver when the settings enable one.
    pub fn new(settings: CaptchaSettings) -> Result<Self, CaptchaError> {
        let solver = HttpCaptchaSolver::from_settings(&settings)?
            .map(|s| Arc::new(s) as Arc<dyn CaptchaSolver>);
        Ok(Self { settings, solver })
    }

    pub fn from_config(config: &PolicyConfig) -> Result<Self, CaptchaError> {
        Self::new(config.snapshot().captcha)
    }

    pub fn with_solver(settings: CaptchaSettings, solver: Arc<dyn CaptchaSolver>) -> Self {
        Self {
            settings,
            solver: Some(solver),
        }
    }

    pub fn status(&self) -> CaptchaStatus {
        CaptchaStatus {
            service: self.settings.service.clone(),
            solver_enabled: self.solver.is_some(),
            solver: self.solver.as_ref().map(|s| s.name().to_string()),
            timeout_ms: self.settings.timeout_ms,
            poll_interval_ms: self.settings.poll_interval_ms,
            retries: self.settings.retries,
        }
    }

    /// Which captcha, if any, the page shows. Evaluation failures count as
    /// "none".
    pub async fn detect(&self, page: &dyn PageHandle) -> Option<CaptchaKind> {
        match page.evaluate(DETECT_SCRIPT, Vec::new()).await {
            Ok(Value::String(kind)) => kind.parse().ok(),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "captcha detection failed");
                None
            }
        }
    }

    /// Hide automation markers and trigger invisible reCAPTCHA v3.
    pub async fn stealth_bypass(&self, page: &dyn PageHandle) -> bool {
        if let Err(e) = page.evaluate_on_new_document(STEALTH_SCRIPT).await {
            warn!(error = %e, "stealth script registration failed");
            return false;
        }
        match page.evaluate(EXECUTE_V3_SCRIPT, Vec::new()).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "reCAPTCHA v3 execution failed");
                false
            }
        }
    }

    pub async fn extract_site_key(&self, page: &dyn PageHandle) -> Result<String, CaptchaError> {
        match page.evaluate(SITE_KEY_SCRIPT, Vec::new()).await? {
            Value::String(key) if !key.is_empty() => Ok(key),
            _ => Err(CaptchaError::NoSiteKey),
        }
    }

    /// Solve through the configured service and inject the token.
    pub async fn solve(&self, page: &dyn PageHandle, kind: CaptchaKind) -> Result<String, CaptchaError> {
        let solver = self.solver.as_ref().ok_or(CaptchaError::NotConfigured)?;
        let request = SolveRequest {
            site_key: self.extract_site_key(page).await?,
            page_url: page.url(),
            kind,
        };

        let task_id = solver.submit(&request).await?;
        let token = self.wait_for_token(solver.as_ref(), &task_id).await?;

        page.evaluate(INJECT_SCRIPT, vec![json!(token)]).await?;
        info!(%kind, solver = solver.name(), "captcha token injected");
        Ok(token)
    }

    async fn wait_for_token(
        &self,
        solver: &dyn CaptchaSolver,
        task_id: &str,
    ) -> Result<String, CaptchaError> {
        let timeout = Duration::from_millis(self.settings.timeout_ms);
        let interval = Duration::from_millis(self.settings.poll_interval_ms.max(1));
        let started = Instant::now();

        loop {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(CaptchaError::Timeout {
                    waited_ms: elapsed.as_millis() as u64,
                });
            }
            tokio::time::sleep(interval.min(timeout - elapsed)).await;
            match solver.poll(task_id).await? {
                TaskStatus::Ready(token) => return Ok(token),
                TaskStatus::Pending => debug!(task_id, "captcha not ready"),
            }
        }
    }

    /// Detect, then bypass or solve. Solving is attempted up to
    /// `captcha.retries` times; a missing site key is not retried.
    pub async fn handle(&self, page: &dyn PageHandle) -> CaptchaOutcome {
        let Some(kind) = self.detect(page).await else {
            return CaptchaOutcome::not_detected();
        };
        info!(%kind, "captcha detected");

        let Some(solver) = &self.solver else {
            let solved = self.stealth_bypass(page).await;
            return CaptchaOutcome {
                detected: true,
                kind: Some(kind),
                solved,
                method: Some("stealth".to_string()),
                error: None,
            };
        };

        let attempts = self.settings.retries.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.solve(page, kind).await {
                Ok(_) => {
                    return CaptchaOutcome {
                        detected: true,
                        kind: Some(kind),
                        solved: true,
                        method: Some(solver.name().to_string()),
                        error: None,
                    };
                }
                Err(e) => {
                    warn!(%kind, attempt, attempts, error = %e, "captcha solve failed");
                    let give_up = matches!(e, CaptchaError::NoSiteKey);
                    last_error = Some(e.to_string());
                    if give_up {
                        break;
                    }
                }
            }
        }

        CaptchaOutcome {
            detected: true,
            kind: Some(kind),
            solved: false,
            method: Some(solver.name().to_string()),
            error: last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePage;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Becomes ready after `pending` polls.
    struct ScriptedSolver {
        pending: Mutex<u32>,
        submitted: Mutex<Vec<SolveRequest>>,
    }

    impl ScriptedSolver {
        fn new(pending: u32) -> Arc<Self> {
            Arc::new(Self {
                pending: Mutex::new(pending),
                submitted: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CaptchaSolver for ScriptedSolver {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn submit(&self, request: &SolveRequest) -> Result<String, CaptchaError> {
            self.submitted.lock().unwrap().push(request.clone());
            Ok("task-1".into())
        }
        async fn poll(&self, _task_id: &str) -> Result<TaskStatus, CaptchaError> {
            let mut pending = self.pending.lock().unwrap();
            if *pending == 0 {
                Ok(TaskStatus::Ready("tok-123".into()))
            } else {
                *pending -= 1;
                Ok(TaskStatus::Pending)
            }
        }
    }

    fn settings() -> CaptchaSettings {
        CaptchaSettings {
            timeout_ms: 20_000,
            poll_interval_ms: 5_000,
            ..CaptchaSettings::default()
        }
    }

    #[tokio::test]
    async fn no_captcha_detected() {
        let handler = CaptchaHandler::new(CaptchaSettings::default()).unwrap();
        let outcome = handler.handle(&FakePage::new()).await;
        assert_eq!(outcome, CaptchaOutcome::not_detected());
    }

    #[tokio::test]
    async fn stealth_without_solver() {
        let handler = CaptchaHandler::new(CaptchaSettings::default()).unwrap();
        let page = FakePage::new().evaluates("grecaptcha", Ok(json!("recaptcha_v3")));
        let outcome = handler.handle(&page).await;
        assert!(outcome.detected);
        assert!(outcome.solved);
        assert_eq!(outcome.kind, Some(CaptchaKind::RecaptchaV3));
        assert_eq!(outcome.method.as_deref(), Some("stealth"));
        assert!(page.calls().contains(&"evaluate_on_new_document".to_string()));
        assert!(!handler.status().solver_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn solver_token_is_polled_and_injected() {
        let solver = ScriptedSolver::new(2);
        let handler = CaptchaHandler::with_solver(settings(), solver.clone());
        let page = FakePage::new()
            .evaluates("data-sitekey')", Ok(json!("site-key-abc")))
            .evaluates("hcaptcha", Ok(json!("hcaptcha")));

        let start = Instant::now();
        let outcome = handler.handle(&page).await;
        assert!(outcome.solved, "{outcome:?}");
        assert_eq!(outcome.method.as_deref(), Some("scripted"));
        assert_eq!(start.elapsed(), Duration::from_secs(15));

        let submitted = solver.submitted.lock().unwrap();
        assert_eq!(submitted[0].site_key, "site-key-abc");
        assert_eq!(submitted[0].kind, CaptchaKind::Hcaptcha);
        assert_eq!(submitted[0].page_url, "https://shop.example.com/checkout");
    }

    #[tokio::test(start_paused = true)]
    async fn solver_timeout_is_reported() {
        let handler = CaptchaHandler::with_solver(
            CaptchaSettings { retries: 1, ..settings() },
            ScriptedSolver::new(100),
        );
        let page = FakePage::new()
            .evaluates("data-sitekey')", Ok(json!("k")))
            .evaluates("hcaptcha", Ok(json!("hcaptcha")));
        let outcome = handler.handle(&page).await;
        assert!(!outcome.solved);
        assert!(outcome.error.unwrap().contains("not solved within 20000ms"));
    }

    #[tokio::test]
    async fn missing_site_key_is_not_retried() {
        let solver = ScriptedSolver::new(0);
        let handler = CaptchaHandler::with_solver(settings(), solver.clone());
        let page = FakePage::new().evaluates("hcaptcha", Ok(json!("hcaptcha")));
        let outcome = handler.handle(&page).await;
        assert!(!outcome.solved);
        assert_eq!(outcome.error.as_deref(), Some("could not extract captcha site key"));
        assert!(solver.submitted.lock().unwrap().is_empty());
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [CaptchaKind::RecaptchaV2, CaptchaKind::CloudflareTurnstile] {
            assert_eq!(kind.as_str().parse::<CaptchaKind>(), Ok(kind));
        }
        assert!("geetest".parse::<CaptchaKind>().is_err());
    }
}
