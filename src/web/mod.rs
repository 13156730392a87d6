//! HTTP probes for consoles, exporters and security services
//!
//! [`HttpProber`] wraps one `reqwest` client. It accepts invalid certificates
//! because the stack under test runs with self-signed dev certificates.

mod catalog;

pub use catalog::{
    catalog, evaluate, run_catalog, EndpointCheck, Expect, HttpMethod, WebCheckOutcome, WebReport,
    CATALOG_NAMES,
};

use std::time::{Duration, Instant};

use reqwest::header::{HeaderName, HeaderValue};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

/// Web probe errors
#[derive(Debug, Error)]
pub enum WebError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("Invalid header {0}")]
    InvalidHeader(String),
}

/// Basic auth pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl From<(String, String)> for BasicAuth {
    fn from((username, password): (String, String)) -> Self {
        Self { username, password }
    }
}

/// Status and body of a finished request
#[derive(Debug, Clone)]
pub struct WebResponse {
    pub status: u16,
    pub body: String,
}

impl WebResponse {
    /// Body parsed as JSON, if it is JSON
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// One request, described independently of the client
#[derive(Debug, Clone)]
pub struct WebRequest<'a> {
    pub method: HttpMethod,
    pub url: &'a str,
    pub auth: Option<&'a BasicAuth>,
    pub headers: Vec<(&'a str, &'a str)>,
    pub json: Option<Value>,
}

impl<'a> WebRequest<'a> {
    pub fn get(url: &'a str) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            auth: None,
            headers: Vec::new(),
            json: None,
        }
    }

    pub fn with_auth(mut self, auth: Option<&'a BasicAuth>) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_header(mut self, name: &'a str, value: &'a str) -> Self {
        self.headers.push((name, value));
        self
    }
}

#[derive(Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    request_timeout: Duration,
    retry_interval: Duration,
}

impl HttpProber {
    /// Per-request timeout of 5s, 2s between readiness attempts
    pub fn new() -> Result<Self, WebError> {
        Self::with_timeouts(Duration::from_secs(5), Duration::from_secs(2))
    }

    pub fn with_timeouts(
        request_timeout: Duration,
        retry_interval: Duration,
    ) -> Result<Self, WebError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(request_timeout)
            .user_agent(concat!("infra-probe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WebError::Client(e.to_string()))?;

        Ok(Self {
            client,
            request_timeout,
            retry_interval,
        })
    }

    /// Poll `url` until it answers with a status below 500
    ///
    /// Connection errors and 5xx answers count as "not yet"; returns `false`
    /// once `timeout` has elapsed.
    pub async fn wait_for_web_service(
        &self,
        url: &str,
        timeout: Duration,
        auth: Option<&BasicAuth>,
    ) -> bool {
        let started = Instant::now();

        loop {
            let remaining = timeout.saturating_sub(started.elapsed());
            let budget = self.request_timeout.min(remaining.max(Duration::from_millis(1)));

            let mut builder = self.client.get(url).timeout(budget);
            if let Some(auth) = auth {
                builder = builder.basic_auth(&auth.username, Some(&auth.password));
            }

            match builder.send().await {
                Ok(response) if response.status().as_u16() < 500 => {
                    info!(
                        url = %url,
                        status = response.status().as_u16(),
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Web service is responding"
                    );
                    return true;
                }
                Ok(response) => {
                    debug!(url = %url, status = response.status().as_u16(), "Web service not ready");
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "Web request failed");
                }
            }

            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(self.retry_interval.min(remaining)).await;
            if started.elapsed() >= timeout {
                break;
            }
        }

        info!(url = %url, timeout_ms = timeout.as_millis() as u64, "Web service did not respond");
        false
    }

    /// Authenticated GET
    pub async fn get(&self, url: &str, auth: Option<&BasicAuth>) -> Result<WebResponse, WebError> {
        self.send(&WebRequest::get(url).with_auth(auth)).await
    }

    pub async fn send(&self, request: &WebRequest<'_>) -> Result<WebResponse, WebError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };
        let mut builder = self.client.request(method, request.url);

        if let Some(auth) = request.auth {
            builder = builder.basic_auth(&auth.username, Some(&auth.password));
        }
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| WebError::InvalidHeader(name.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| WebError::InvalidHeader(name.as_str().to_string()))?;
            builder = builder.header(name, value);
        }
        if let Some(json) = &request.json {
            builder = builder.json(json);
        }

        let request_err = |e: reqwest::Error| WebError::Request {
            url: request.url.to_string(),
            message: e.to_string(),
        };
        let response = builder.send().await.map_err(request_err)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(request_err)?;

        debug!(url = %request.url, status = status, "Web request finished");
        Ok(WebResponse { status, body })
    }
}
