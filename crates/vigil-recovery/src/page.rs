//! Automation page seam.
//!
//! Vigil never drives a browser itself. The embedding application
//! implements [`PageHandle`] over whatever automation stack it uses.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

/// Navigation lifecycle event that counts as "loaded".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WaitUntil {
    Load,
    DomContentLoaded,
    NetworkIdle0,
    #[default]
    NetworkIdle2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GotoOptions {
    pub wait_until: WaitUntil,
    pub timeout: Option<Duration>,
}

impl GotoOptions {
    pub fn new(wait_until: WaitUntil) -> Self {
        Self {
            wait_until,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Main-frame response of a navigation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NavigationResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
}

impl NavigationResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `Retry-After` in whole seconds; HTTP-date values are not supported.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.header("retry-after")?.trim().parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenshotOptions {
    pub full_page: bool,
    pub omit_background: bool,
    pub timeout: Option<Duration>,
}

impl Default for ScreenshotOptions {
    fn default() -> Self {
        Self {
            full_page: true,
            omit_background: false,
            timeout: None,
        }
    }
}

/// Script-engine counters for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetrics {
    pub js_heap_used_size: u64,
    pub js_heap_total_size: u64,
}

#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Navigate. `Ok(None)` means the navigation produced no response
    /// (e.g. `about:blank` or a same-document navigation).
    async fn goto(&self, url: &str, options: &GotoOptions)
    -> anyhow::Result<Option<NavigationResponse>>;

    /// Evaluate a function expression in the page, calling it with `args`,
    /// and return its JSON-serialisable result.
    async fn evaluate(&self, script: &str, args: Vec<Value>) -> anyhow::Result<Value>;

    /// Register a script to run before any page script on every navigation.
    async fn evaluate_on_new_document(&self, script: &str) -> anyhow::Result<()>;

    async fn screenshot(&self, options: &ScreenshotOptions) -> anyhow::Result<Bytes>;

    async fn metrics(&self) -> anyhow::Result<PageMetrics>;

    async fn reload(&self, options: &GotoOptions) -> anyhow::Result<()>;

    fn url(&self) -> String;

    /// Whether the page's browser connection is still alive.
    fn is_connected(&self) -> bool;

    /// Close the page and release its worker resources.
    async fn close(&self) -> anyhow::Result<()>;
}
