//! Vigil recovery strategies.
//!
//! A [`RecoveryCatalog`] holds one [`RecoveryStrategy`] per [`FailureMode`]
//! and builds resilient navigation and screenshots on top of them. Captcha
//! pages are handled by [`CaptchaHandler`], optionally delegating to an
//! external [`CaptchaSolver`].

pub mod captcha;
pub mod catalog;
pub mod error;
pub mod page;
pub mod resilient;
pub mod solver;
pub mod strategy;

#[cfg(test)]
mod testing;

pub use captcha::{CaptchaHandler, CaptchaKind, CaptchaOutcome, CaptchaStatus};
pub use catalog::{CatalogStatus, RecoveryCatalog};
pub use error::{CaptchaError, RecoveryError, RecoveryResult};
pub use page::{GotoOptions, NavigationResponse, PageHandle, PageMetrics, ScreenshotOptions, WaitUntil};
pub use resilient::{DetectedIssue, IssueKind, NavigateOptions, NavigationSuccess, ScreenshotCapture};
pub use solver::{CaptchaSolver, HttpCaptchaSolver, SolveRequest, TaskStatus, default_tls_config};
pub use strategy::{FailureMode, RecoveryAction, RecoveryContext, RecoveryOutcome, RecoveryStrategy};
