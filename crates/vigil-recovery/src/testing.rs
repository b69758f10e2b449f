//! Scriptable in-memory page for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::page::{
    GotoOptions, NavigationResponse, PageHandle, PageMetrics, ScreenshotOptions, WaitUntil,
};

#[derive(Debug, Clone, Copy)]
pub(crate) enum BlankGoto {
    Ok,
    Fail,
    Hang,
}

#[derive(Debug, Clone)]
pub(crate) enum GotoStep {
    Status(u16, Option<&'static str>),
    Fail(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shots {
    Ok,
    FullFails,
    AllFail,
}

pub(crate) struct FakePage {
    blank: BlankGoto,
    steps: Mutex<VecDeque<GotoStep>>,
    evaluations: Vec<(&'static str, Result<Value, &'static str>)>,
    reload_fails: bool,
    shots: Shots,
    heap_used: u64,
    connected: bool,
    calls: Mutex<Vec<String>>,
}

impl FakePage {
    pub(crate) fn new() -> Self {
        Self {
            blank: BlankGoto::Ok,
            steps: Mutex::new(VecDeque::new()),
            evaluations: Vec::new(),
            reload_fails: false,
            shots: Shots::Ok,
            heap_used: 10_000_000,
            connected: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn blank(mut self, blank: BlankGoto) -> Self {
        self.blank = blank;
        self
    }

    /// Queue navigation results; an empty queue answers 200.
    pub(crate) fn steps(self, steps: impl IntoIterator<Item = GotoStep>) -> Self {
        self.steps.lock().unwrap().extend(steps);
        self
    }

    /// Scripts containing `needle` evaluate to `result`.
    pub(crate) fn evaluates(mut self, needle: &'static str, result: Result<Value, &'static str>) -> Self {
        self.evaluations.push((needle, result));
        self
    }

    pub(crate) fn failing_reload(mut self) -> Self {
        self.reload_fails = true;
        self
    }

    pub(crate) fn shots(mut self, shots: Shots) -> Self {
        self.shots = shots;
        self
    }

    pub(crate) fn heap_used(mut self, bytes: u64) -> Self {
        self.heap_used = bytes;
        self
    }

    pub(crate) fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

fn wait_name(wait: WaitUntil) -> &'static str {
    match wait {
        WaitUntil::Load => "load",
        WaitUntil::DomContentLoaded => "domContentLoaded",
        WaitUntil::NetworkIdle0 => "networkIdle0",
        WaitUntil::NetworkIdle2 => "networkIdle2",
    }
}

#[async_trait]
impl PageHandle for FakePage {
    async fn goto(
        &self,
        url: &str,
        _options: &GotoOptions,
    ) -> anyhow::Result<Option<NavigationResponse>> {
        self.log(format!("goto {url}"));
        if url == "about:blank" {
            return match self.blank {
                BlankGoto::Ok => Ok(None),
                BlankGoto::Fail => Err(anyhow!("blank navigation failed")),
                BlankGoto::Hang => std::future::pending().await,
            };
        }
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            None => Ok(Some(NavigationResponse::new(200))),
            Some(GotoStep::Status(status, retry_after)) => {
                let mut resp = NavigationResponse::new(status);
                if let Some(value) = retry_after {
                    resp = resp.with_header("Retry-After", value);
                }
                Ok(Some(resp))
            }
            Some(GotoStep::Fail(message)) => Err(anyhow!(message)),
        }
    }

    async fn evaluate(&self, script: &str, _args: Vec<Value>) -> anyhow::Result<Value> {
        self.log("evaluate");
        self.evaluations
            .iter()
            .find(|(needle, _)| script.contains(needle))
            .map(|(_, result)| result.clone().map_err(|e| anyhow!(e)))
            .unwrap_or(Ok(Value::Null))
    }

    async fn evaluate_on_new_document(&self, _script: &str) -> anyhow::Result<()> {
        self.log("evaluate_on_new_document");
        Ok(())
    }

    async fn screenshot(&self, options: &ScreenshotOptions) -> anyhow::Result<Bytes> {
        let full = options.full_page;
        self.log(if full { "screenshot full" } else { "screenshot minimal" });
        match (self.shots, full) {
            (Shots::Ok, _) | (Shots::FullFails, false) => Ok(Bytes::from_static(b"\x89PNG")),
            (Shots::FullFails, true) => Err(anyhow!("capture timed out")),
            (Shots::AllFail, _) => Err(anyhow!("target closed")),
        }
    }

    async fn metrics(&self) -> anyhow::Result<PageMetrics> {
        Ok(PageMetrics {
            js_heap_used_size: self.heap_used,
            js_heap_total_size: self.heap_used * 2,
        })
    }

    async fn reload(&self, options: &GotoOptions) -> anyhow::Result<()> {
        self.log(format!("reload {}", wait_name(options.wait_until)));
        if self.reload_fails {
            Err(anyhow!("reload failed"))
        } else {
            Ok(())
        }
    }

    fn url(&self) -> String {
        "https://shop.example.com/checkout".to_string()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.log("close");
        Ok(())
    }
}
