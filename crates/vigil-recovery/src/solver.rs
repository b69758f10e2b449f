//! External captcha solving service client.
//!
//! The service speaks a small JSON task protocol:
//!
//! - `POST {endpoint}/createTask` with
//!   `{"clientKey", "task": {"type", "websiteURL", "websiteKey"}}` answers
//!   `{"errorId": 0, "taskId": ...}`.
//! - `POST {endpoint}/getTaskResult` with `{"clientKey", "taskId"}` answers
//!   `{"errorId": 0, "status": "processing" | "ready", "solution": {...}}`.
//!
//! A non-zero `errorId` carries `errorCode` / `errorDescription`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tracing::debug;

use vigil_core::config::CaptchaSettings;

use crate::captcha::CaptchaKind;
use crate::error::CaptchaError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveRequest {
    pub site_key: String,
    pub page_url: String,
    pub kind: CaptchaKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Ready(String),
}

#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    fn name(&self) -> &str;

    /// Submit a task and return its id.
    async fn submit(&self, request: &SolveRequest) -> Result<String, CaptchaError>;

    async fn poll(&self, task_id: &str) -> Result<TaskStatus, CaptchaError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceReply {
    #[serde(default)]
    error_id: i64,
    error_code: Option<String>,
    error_description: Option<String>,
    task_id: Option<Value>,
    status: Option<String>,
    solution: Option<Value>,
}

impl ServiceReply {
    fn check(self) -> Result<Self, CaptchaError> {
        if self.error_id == 0 {
            return Ok(self);
        }
        let detail = self
            .error_description
            .or(self.error_code)
            .unwrap_or_else(|| format!("errorId {}", self.error_id));
        Err(CaptchaError::Solver(detail))
    }
}

/// Task type name sent to the service.
fn task_type(kind: CaptchaKind) -> &'static str {
    match kind {
        CaptchaKind::RecaptchaV2 | CaptchaKind::UnknownChallenge => "RecaptchaV2TaskProxyless",
        CaptchaKind::RecaptchaV3 => "RecaptchaV3TaskProxyless",
        CaptchaKind::Hcaptcha => "HCaptchaTaskProxyless",
        CaptchaKind::CloudflareTurnstile => "TurnstileTaskProxyless",
    }
}

/// Client TLS configuration trusting the Mozilla root store.
pub fn default_tls_config() -> Result<Arc<rustls::ClientConfig>, CaptchaError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()
    .map_err(|e| CaptchaError::Http(format!("tls protocol version error: {e}")))?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(Arc::new(config))
}

#[derive(Clone)]
struct Tls {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

/// [`CaptchaSolver`] over HTTP/1.1, with TLS for `https` endpoints.
#[derive(Clone)]
pub struct HttpCaptchaSolver {
    name: String,
    /// `host:port` to connect to.
    address: String,
    /// Value of the `host` header.
    host_header: String,
    base_path: String,
    api_key: String,
    timeout: Duration,
    tls: Option<Tls>,
}

impl std::fmt::Debug for HttpCaptchaSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCaptchaSolver")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("base_path", &self.base_path)
            .field("tls", &self.tls.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpCaptchaSolver {
    /// `endpoint` must be an `http://` or `https://host[:port][/base]` URL.
    /// `https` endpoints verify against the Mozilla root store.
    pub fn new(
        name: &str,
        endpoint: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, CaptchaError> {
        let uri: http::Uri = endpoint
            .parse()
            .map_err(|e| CaptchaError::Http(format!("invalid endpoint {endpoint}: {e}")))?;
        let default_port = match uri.scheme_str() {
            Some("http") => 80,
            Some("https") => 443,
            _ => {
                return Err(CaptchaError::Http(format!(
                    "unsupported endpoint scheme in {endpoint}; expected http or https"
                )));
            }
        };
        let authority = uri
            .authority()
            .ok_or_else(|| CaptchaError::Http(format!("endpoint {endpoint} has no host")))?;
        let host = authority.host().trim_start_matches('[').trim_end_matches(']');
        let address = match authority.port_u16() {
            Some(_) => authority.to_string(),
            None => format!("{}:{default_port}", authority.host()),
        };

        let tls = if default_port == 443 {
            let server_name = ServerName::try_from(host.to_string())
                .map_err(|e| CaptchaError::Http(format!("invalid tls server name {host}: {e}")))?;
            Some(Tls {
                connector: TlsConnector::from(default_tls_config()?),
                server_name,
            })
        } else {
            None
        };

        Ok(Self {
            name: name.to_string(),
            address,
            host_header: authority.to_string(),
            base_path: uri.path().trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout,
            tls,
        })
    }

    /// Replace the client TLS configuration, e.g. to trust a private CA.
    /// Has no effect on `http` endpoints.
    pub fn with_tls_config(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        if let Some(tls) = &mut self.tls {
            tls.connector = TlsConnector::from(config);
        }
        self
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Build from settings; `Ok(None)` when no solver is configured.
    pub fn from_settings(settings: &CaptchaSettings) -> Result<Option<Self>, CaptchaError> {
        if !settings.solver_enabled() {
            return Ok(None);
        }
        let endpoint = settings.endpoint.as_deref().unwrap_or_default();
        Self::new(
            &settings.service,
            endpoint,
            settings.api_key.as_deref().unwrap_or_default(),
            Duration::from_millis(settings.timeout_ms),
        )
        .map(Some)
    }

    async fn post(&self, method: &str, body: Value) -> Result<ServiceReply, CaptchaError> {
        let payload = serde_json::to_vec(&body)
            .map_err(|e| CaptchaError::Http(format!("encode {method}: {e}")))?;

        let request = async {
            let stream = tokio::net::TcpStream::connect(&self.address)
                .await
                .map_err(|e| CaptchaError::Http(format!("connect {}: {e}", self.address)))?;
            match &self.tls {
                Some(tls) => {
                    let stream = tls
                        .connector
                        .connect(tls.server_name.clone(), stream)
                        .await
                        .map_err(|e| CaptchaError::Http(format!("tls handshake: {e}")))?;
                    self.exchange(stream, method, payload).await
                }
                None => self.exchange(stream, method, payload).await,
            }
        };

        match tokio::time::timeout(self.timeout, request).await {
            Ok(reply) => reply?.check(),
            Err(_) => Err(CaptchaError::Http(format!(
                "{method} timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    /// One request/response over an established connection.
    async fn exchange<S>(
        &self,
        stream: S,
        method: &str,
        payload: Vec<u8>,
    ) -> Result<ServiceReply, CaptchaError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let path = format!("{}/{method}", self.base_path);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| CaptchaError::Http(format!("handshake: {e}")))?;

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("POST")
            .uri(&path)
            .header("host", &self.host_header)
            .header("content-type", "application/json")
            .header("user-agent", concat!("vigil/", env!("CARGO_PKG_VERSION")))
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| CaptchaError::Http(format!("build request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| CaptchaError::Http(format!("{method}: {e}")))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| CaptchaError::Http(format!("read {method} body: {e}")))?
            .to_bytes();

        if !status.is_success() {
            return Err(CaptchaError::Http(format!("{method} returned {status}")));
        }
        serde_json::from_slice::<ServiceReply>(&body)
            .map_err(|e| CaptchaError::Solver(format!("malformed {method} reply: {e}")))
    }
}

#[async_trait]
impl CaptchaSolver for HttpCaptchaSolver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, request: &SolveRequest) -> Result<String, CaptchaError> {
        let body = json!({
            "clientKey": self.api_key,
            "task": {
                "type": task_type(request.kind),
                "websiteURL": request.page_url,
                "websiteKey": request.site_key,
            },
        });
        let reply = self.post("createTask", body).await?;
        let task_id = match reply.task_id {
            Some(Value::String(id)) => id,
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(CaptchaError::Solver("createTask reply has no taskId".to_string())),
        };
        debug!(solver = %self.name, %task_id, kind = %request.kind, "captcha task submitted");
        Ok(task_id)
    }

    async fn poll(&self, task_id: &str) -> Result<TaskStatus, CaptchaError> {
        let task: Value = task_id
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(task_id));
        let reply = self
            .post("getTaskResult", json!({ "clientKey": self.api_key, "taskId": task }))
            .await?;

        if reply.status.as_deref() != Some("ready") {
            return Ok(TaskStatus::Pending);
        }
        let token = reply
            .solution
            .as_ref()
            .and_then(|s| s.get("gRecaptchaResponse").or_else(|| s.get("token")))
            .and_then(Value::as_str)
            .ok_or_else(|| CaptchaError::Solver("ready task has no token".to_string()))?;
        Ok(TaskStatus::Ready(token.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_parsing() {
        let s = HttpCaptchaSolver::new("relay", "http://127.0.0.1:8089/api/", "k", Duration::from_secs(1))
            .unwrap();
        assert_eq!(s.address, "127.0.0.1:8089");
        assert_eq!(s.base_path, "/api");
        assert!(!s.is_tls());

        let s = HttpCaptchaSolver::new("relay", "http://solver.internal", "k", Duration::from_secs(1))
            .unwrap();
        assert_eq!(s.address, "solver.internal:80");
        assert_eq!(s.host_header, "solver.internal");
        assert_eq!(s.base_path, "");
    }

    #[test]
    fn https_endpoints_default_to_port_443_with_tls() {
        let s = HttpCaptchaSolver::new("anticaptcha", "https://api.anti-captcha.com", "k", Duration::from_secs(1))
            .unwrap();
        assert!(s.is_tls());
        assert_eq!(s.address, "api.anti-captcha.com:443");
        assert_eq!(s.host_header, "api.anti-captcha.com");
    }

    #[test]
    fn other_schemes_are_rejected() {
        let err = HttpCaptchaSolver::new("x", "ftp://api.example.com", "k", Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, CaptchaError::Http(_)));
    }

    #[test]
    fn disabled_settings_build_no_solver() {
        assert!(HttpCaptchaSolver::from_settings(&CaptchaSettings::default()).unwrap().is_none());

        let settings = CaptchaSettings {
            service: "relay".into(),
            endpoint: Some("http://localhost:9000".into()),
            api_key: Some("secret".into()),
            ..CaptchaSettings::default()
        };
        let solver = HttpCaptchaSolver::from_settings(&settings).unwrap().unwrap();
        assert_eq!(solver.name(), "relay");
    }

    #[test]
    fn error_replies_surface_description() {
        let reply: ServiceReply = serde_json::from_value(json!({
            "errorId": 1,
            "errorCode": "ERROR_KEY_DOES_NOT_EXIST",
            "errorDescription": "Account authorization key not found"
        }))
        .unwrap();
        let err = reply.check().unwrap_err();
        assert!(err.to_string().contains("authorization key not found"));
    }
}
