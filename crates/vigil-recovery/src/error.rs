use thiserror::Error;

use crate::strategy::FailureMode;

/// Errors from resilient page operations.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("navigation failed after {attempts} attempts: {last_error}")]
    NavigationExhausted { attempts: u32, last_error: String },

    #[error("HTTP {status}")]
    Http { status: u16 },

    #[error("still rate limited after {waits} waits")]
    RateLimitExhausted { waits: u32 },

    #[error("{mode} recovery failed: {reason}")]
    Unrecovered { mode: FailureMode, reason: String },

    #[error("page operation failed: {0:#}")]
    Page(anyhow::Error),

    #[error("screenshot failed ({primary}); fallback failed ({fallback})")]
    Screenshot { primary: String, fallback: String },
}

impl From<anyhow::Error> for RecoveryError {
    fn from(err: anyhow::Error) -> Self {
        RecoveryError::Page(err)
    }
}

/// Errors from captcha solving.
#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("no captcha solving service configured")]
    NotConfigured,

    #[error("could not extract captcha site key")]
    NoSiteKey,

    #[error("captcha solver error: {0}")]
    Solver(String),

    #[error("captcha not solved within {waited_ms}ms")]
    Timeout { waited_ms: u64 },

    #[error("page operation failed: {0:#}")]
    Page(anyhow::Error),

    #[error("solver transport error: {0}")]
    Http(String),
}

impl From<anyhow::Error> for CaptchaError {
    fn from(err: anyhow::Error) -> Self {
        CaptchaError::Page(err)
    }
}

pub type RecoveryResult<T> = Result<T, RecoveryError>;
