//! Retry strategies and the retry driver.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use vigil_core::{ErrorKind, PolicyConfig};

use crate::classify::classify;
use crate::error::RetryError;

/// Most delays listed by [`RetryPolicy::retry_info`].
const MAX_ESTIMATED_DELAYS: u32 = 5;

/// Effective retry parameters for one error kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStrategy {
    pub error_kind: ErrorKind,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter_percent: f64,
}

impl RetryStrategy {
    /// Exponential delay for `attempt` (1-based), capped, before jitter.
    pub fn capped_delay_ms(&self, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        raw.min(self.max_delay_ms as f64)
    }
}

/// Passed to the `on_retry` hook before each backoff sleep.
#[derive(Debug)]
pub struct RetryAttempt<'e, E> {
    /// The attempt that just failed (1-based).
    pub attempt: u32,
    pub delay: Duration,
    pub error: &'e E,
}

type RetryHook<'a, E> = Box<dyn FnMut(RetryAttempt<'_, E>) + Send + 'a>;
type RetryPredicate<'a, E> = Box<dyn Fn(&E) -> bool + Send + Sync + 'a>;

/// Options for [`RetryPolicy::execute_with_retry`].
pub struct RetryOptions<'a, E> {
    /// Kind whose strategy governs the retries.
    pub error_kind: ErrorKind,
    on_retry: Option<RetryHook<'a, E>>,
    should_retry: Option<RetryPredicate<'a, E>>,
    cancel: Option<watch::Receiver<bool>>,
}

impl<E> Default for RetryOptions<'_, E> {
    fn default() -> Self {
        Self::new(ErrorKind::Unknown)
    }
}

impl<'a, E> RetryOptions<'a, E> {
    pub fn new(error_kind: ErrorKind) -> Self {
        Self {
            error_kind,
            on_retry: None,
            should_retry: None,
            cancel: None,
        }
    }

    /// Observe each retry (attempt number, chosen delay, error).
    pub fn on_retry(mut self, hook: impl FnMut(RetryAttempt<'_, E>) + Send + 'a) -> Self {
        self.on_retry = Some(Box::new(hook));
        self
    }

    /// Stop retrying as soon as the predicate returns `false`.
    pub fn should_retry(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'a) -> Self {
        self.should_retry = Some(Box::new(predicate));
        self
    }

    /// Abort the backoff sleep once the watched value becomes `true`.
    pub fn cancel_on(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Retry timing summary for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryInfo {
    pub error_kind: ErrorKind,
    pub max_retries: u32,
    pub estimated_delays_ms: Vec<u64>,
    pub total_estimated_time_ms: u64,
}

/// Retry policy engine backed by the shared policy config.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: Arc<PolicyConfig>,
}

impl RetryPolicy {
    pub fn new(config: Arc<PolicyConfig>) -> Self {
        Self { config }
    }

    /// Classify an error into a retry category.
    pub fn classify<E: Display + ?Sized>(&self, error: &E) -> ErrorKind {
        classify(error)
    }

    /// Strategy for `kind`: the per-kind override where present, global
    /// retry settings otherwise.
    pub fn strategy_for(&self, kind: ErrorKind) -> RetryStrategy {
        let retry = self.config.snapshot().retry;
        let overrides = retry.strategies.get(&kind).copied().unwrap_or_default();
        RetryStrategy {
            error_kind: kind,
            max_retries: overrides.max_retries.unwrap_or(retry.max_retries),
            base_delay_ms: overrides.base_delay_ms.unwrap_or(retry.base_delay_ms),
            backoff_multiplier: retry.backoff_multiplier,
            max_delay_ms: retry.max_delay_ms,
            jitter_percent: retry.jitter_percent,
        }
    }

    /// Backoff delay before retrying after `attempt` failed.
    ///
    /// The result is never below 1ms and never above
    /// `max_delay_ms * (1 + jitter_percent)`.
    pub fn delay_for(&self, attempt: u32, strategy: &RetryStrategy) -> Duration {
        let capped = strategy.capped_delay_ms(attempt);
        let span = capped * strategy.jitter_percent;
        let jitter = if span > 0.0 {
            rand::thread_rng().gen_range(-span..=span)
        } else {
            0.0
        };
        let ms = (capped + jitter).floor().max(1.0);
        Duration::from_millis(ms as u64)
    }

    /// Run `op` until it succeeds or the strategy for
    /// `options.error_kind` gives up.
    ///
    /// A failure is returned immediately, without sleeping, once the retry
    /// budget is spent or `should_retry` declines.
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        mut op: F,
        mut options: RetryOptions<'_, E>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let strategy = self.strategy_for(options.error_kind);
        let kind = strategy.error_kind;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(%kind, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if attempt > strategy.max_retries {
                debug!(%kind, attempt, max_retries = strategy.max_retries, %error, "retries exhausted");
                return Err(RetryError::Exhausted {
                    kind,
                    attempts: attempt,
                    error,
                });
            }

            if let Some(should_retry) = &options.should_retry
                && !should_retry(&error)
            {
                debug!(%kind, attempt, %error, "error rejected for retry");
                return Err(RetryError::Rejected {
                    kind,
                    attempts: attempt,
                    error,
                });
            }

            let delay = self.delay_for(attempt, &strategy);
            if let Some(hook) = options.on_retry.as_mut() {
                hook(RetryAttempt {
                    attempt,
                    delay,
                    error: &error,
                });
            }
            debug!(
                %kind,
                attempt,
                delay_ms = delay.as_millis() as u64,
                %error,
                "retrying after failure"
            );

            match options.cancel.as_mut() {
                Some(cancel) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancelled(cancel) => {
                            debug!(%kind, attempt, "retry cancelled");
                            return Err(RetryError::Cancelled { attempts: attempt, error });
                        }
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }

    /// Deterministic (jitter-free) delay estimate for `kind`.
    pub fn retry_info(&self, kind: ErrorKind) -> RetryInfo {
        let strategy = self.strategy_for(kind);
        let delays: Vec<u64> = (1..=strategy.max_retries.min(MAX_ESTIMATED_DELAYS))
            .map(|attempt| strategy.capped_delay_ms(attempt).floor().max(1.0) as u64)
            .collect();
        RetryInfo {
            error_kind: kind,
            max_retries: strategy.max_retries,
            total_estimated_time_ms: delays.iter().sum(),
            estimated_delays_ms: delays,
        }
    }

    /// [`Self::retry_info`] for every classifiable kind.
    pub fn strategy_table(&self) -> Vec<RetryInfo> {
        ErrorKind::CLASSIFIED
            .iter()
            .map(|kind| self.retry_info(*kind))
            .collect()
    }
}

/// Resolves once the watched flag is `true`; never resolves if the sender
/// goes away first.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vigil_core::PolicySettings;

    fn policy_with(jitter: f64) -> RetryPolicy {
        let mut settings = PolicySettings::default();
        settings.retry.jitter_percent = jitter;
        RetryPolicy::new(Arc::new(PolicyConfig::new(settings).unwrap()))
    }

    #[test]
    fn strategy_uses_override_then_global_defaults() {
        let policy = policy_with(0.1);

        let timeout = policy.strategy_for(ErrorKind::Timeout);
        assert_eq!(timeout.max_retries, 4);
        assert_eq!(timeout.base_delay_ms, 2_000);
        assert_eq!(timeout.max_delay_ms, 10_000);

        let unknown = policy.strategy_for(ErrorKind::Unknown);
        assert_eq!(unknown.max_retries, 3);
        assert_eq!(unknown.base_delay_ms, 1_000);

        // Override without a base delay inherits the global one.
        let invalid = policy.strategy_for(ErrorKind::InvalidUrl);
        assert_eq!(invalid.max_retries, 0);
        assert_eq!(invalid.base_delay_ms, 1_000);
    }

    #[test]
    fn delay_without_jitter_is_exponential_and_capped() {
        let policy = policy_with(0.0);
        let strategy = policy.strategy_for(ErrorKind::Unknown);

        let delays: Vec<u128> = (1..=6)
            .map(|a| policy.delay_for(a, &strategy).as_millis())
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 10_000, 10_000]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let policy = policy_with(0.1);
        let strategy = policy.strategy_for(ErrorKind::Unknown);
        let ceiling = (strategy.max_delay_ms as f64 * 1.1) as u128;

        for attempt in 1..=20 {
            for _ in 0..50 {
                let d = policy.delay_for(attempt, &strategy).as_millis();
                assert!(d >= 1);
                assert!(d <= ceiling, "attempt {attempt}: {d} > {ceiling}");
                let capped = strategy.capped_delay_ms(attempt);
                assert!(d as f64 >= (capped * 0.9).floor());
            }
        }
    }

    #[test]
    fn delay_is_floored_at_one_millisecond() {
        let policy = policy_with(1.0);
        let mut strategy = policy.strategy_for(ErrorKind::Unknown);
        strategy.base_delay_ms = 0;
        assert_eq!(policy.delay_for(1, &strategy), Duration::from_millis(1));
    }

    #[test]
    fn huge_attempt_numbers_saturate_at_cap() {
        let policy = policy_with(0.0);
        let strategy = policy.strategy_for(ErrorKind::Timeout);
        assert_eq!(policy.delay_for(u32::MAX, &strategy), Duration::from_millis(10_000));
    }

    #[test]
    fn retry_info_lists_at_most_five_delays() {
        let policy = policy_with(0.1);
        let info = policy.retry_info(ErrorKind::RateLimit);
        assert_eq!(info.max_retries, 5);
        assert_eq!(info.estimated_delays_ms, vec![3_000, 6_000, 10_000, 10_000, 10_000]);
        assert_eq!(info.total_estimated_time_ms, 39_000);

        let invalid = policy.retry_info(ErrorKind::InvalidUrl);
        assert!(invalid.estimated_delays_ms.is_empty());
        assert_eq!(policy.strategy_table().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_url_fails_immediately_without_sleeping() {
        let policy = policy_with(0.1);
        let calls = AtomicU32::new(0);
        let retries = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result: Result<(), _> = policy
            .execute_with_retry(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("Invalid URL: ht!tp://")
                },
                RetryOptions::new(ErrorKind::InvalidUrl).on_retry(|_| {
                    retries.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Exhausted { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(retries.load(Ordering::SeqCst), 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn should_retry_false_rethrows_without_delay() {
        let policy = policy_with(0.1);
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let err = policy
            .execute_with_retry(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("fatal")
                },
                RetryOptions::new(ErrorKind::Network).should_retry(|e: &&str| *e != "fatal"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RetryError::Rejected { attempts: 1, .. }));
        assert_eq!(err.into_inner(), "fatal");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_retries_plus_one_calls() {
        let policy = policy_with(0.0);
        let calls = AtomicU32::new(0);

        let err = policy
            .execute_with_retry(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("connect ECONNREFUSED")
                },
                RetryOptions::new(ErrorKind::Network),
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(err.attempts(), 4);
        assert!(!err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let policy = policy_with(0.0);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            policy
                .execute_with_retry(
                    || async { Err::<(), _>("Navigation timeout exceeded") },
                    RetryOptions::new(ErrorKind::Timeout).cancel_on(rx),
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        tx.send(true).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_first_sleep_returns_at_once() {
        let policy = policy_with(0.0);
        let (_tx, rx) = watch::channel(true);
        let start = tokio::time::Instant::now();

        let err = policy
            .execute_with_retry(
                || async { Err::<(), _>("timeout") },
                RetryOptions::new(ErrorKind::Timeout).cancel_on(rx),
            )
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
