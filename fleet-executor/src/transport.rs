//! Low-level HTTP transport to the hypervisor REST API.
//!
//! The cluster serves a self-signed certificate, so certificate validation
//! is switchable per deployment. HTTP error statuses are returned as normal
//! responses here; callers decide what a 4xx/5xx means.

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde_json::Value;

use crate::ExecutorError;

/// One request to the hypervisor API.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base, e.g. `/nodes/pve/qemu`.
    pub path: String,
    pub headers: Vec<(String, String)>,
    /// JSON body, sent with `Content-Type: application/json`.
    pub body: Option<Value>,
}

impl ApiRequest {
    /// Creates a request with no headers or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the JSON body.
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Value of the first header named `name`, compared case-insensitively.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response from the hypervisor API.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ApiResponse {
    /// Creates a response with no headers.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests to the hypervisor API.
///
/// Implementations must be `Send + Sync` so one transport can be shared by
/// every component of the engine.
#[async_trait]
pub trait HypervisorTransport: Send + Sync {
    /// Issue one request.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Transport`] only when no HTTP response was
    /// received. Non-2xx responses are returned as `Ok`.
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, ExecutorError>;
}

/// [`HypervisorTransport`] over HTTPS using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for `base_url` (e.g. `https://pve.lan:8006/api2/json`).
    ///
    /// # Errors
    /// Returns [`ExecutorError::Config`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        insecure_tls: bool,
        timeout: Duration,
    ) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure_tls)
            .timeout(timeout)
            .build()
            .map_err(|e| ExecutorError::Config(format!("build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl HypervisorTransport for HttpTransport {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, ExecutorError> {
        let url = self.url(&request.path);
        let mut builder = self.client.request(request.method.clone(), &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| ExecutorError::Transport(format!("{} {url}: {}", request.method, error_chain(&e))))?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let body = resp
            .text()
            .await
            .map_err(|e| ExecutorError::Transport(format!("read body of {url}: {}", error_chain(&e))))?;

        tracing::debug!(method = %request.method, path = %request.path, status, "hypervisor response");

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

/// Render an error with its full `source()` chain, e.g. the underlying
/// connection-refused or DNS message behind a `reqwest` error.
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
