//! vigil-retry — typed retry policies keyed by error category.
//!
//! Failures are classified into an [`ErrorKind`](vigil_core::ErrorKind)
//! from their message, each kind maps to a [`RetryStrategy`] read from the
//! policy config, and [`RetryPolicy::execute_with_retry`] drives a fallible
//! async operation through that strategy.
//!
//! # Backoff
//!
//! ```text
//! delay(attempt) = min(base * multiplier^(attempt-1), max_delay)
//! delay         += uniform(-jitter, +jitter) * delay
//! delay          = max(delay, 1ms)
//! ```
//!
//! `INVALID_URL` defaults to zero retries: a malformed input fails the
//! same way every time.

pub mod classify;
pub mod error;
pub mod policy;

pub use classify::{classify, classify_message};
pub use error::RetryError;
pub use policy::{RetryAttempt, RetryInfo, RetryOptions, RetryPolicy, RetryStrategy};
