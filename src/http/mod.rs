//! HTTP transport seam.
//!
//! The executor talks to the network through the [`HttpTransport`] trait so
//! tests can inject scripted responses. The reqwest implementation keeps one
//! client per proxy endpoint and disables redirects: the classifier needs to
//! observe 302s to login/challenge paths rather than have them followed
//! silently.

pub mod executor;

pub use executor::{FetchError, RequestExecutor, RequestOutcome};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, header};
use reqwest::redirect::Policy;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::DEFAULT_HEADERS;
use crate::identity::Identity;

/// One logical request. All engine operations are idempotent GETs, so every
/// spec is safe to retry.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub url: String,
    pub method: Method,
    /// Overlay on top of the browser-mimicking defaults.
    pub headers: Vec<(String, String)>,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Raw response as observed on the wire, before classification.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    /// `Location` header of a redirect response, when present.
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Network-level failure, distinct from upstream error statuses.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// Seam between the executor and the concrete HTTP stack.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        spec: &RequestSpec,
        identity: &Identity,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError>;
}

/// Reqwest-backed transport with one lazily built client per proxy endpoint.
pub struct ReqwestTransport {
    clients: Mutex<HashMap<Option<String>, reqwest::Client>>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client(&self, proxy: Option<&str>) -> Result<reqwest::Client, TransportError> {
        let mut guard = self.clients.lock().await;
        let key = proxy.map(str::to_string);
        if let Some(client) = guard.get(&key) {
            return Ok(client.clone());
        }

        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in DEFAULT_HEADERS {
            let header_name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| TransportError::Other(err.to_string()))?;
            let header_value = reqwest::header::HeaderValue::from_static(value);
            headers.insert(header_name, header_value);
        }

        let mut builder = reqwest::Client::builder()
            .redirect(Policy::none())
            .cookie_store(true)
            .default_headers(headers);
        if let Some(endpoint) = proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(endpoint)
                    .map_err(|err| TransportError::Connection(err.to_string()))?,
            );
        }

        let client = builder
            .build()
            .map_err(|err| TransportError::Other(err.to_string()))?;
        guard.insert(key, client.clone());
        Ok(client)
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        spec: &RequestSpec,
        identity: &Identity,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        let client = self.client(identity.proxy.as_deref()).await?;

        let mut builder = client
            .request(spec.method.clone(), &spec.url)
            .timeout(timeout)
            .header(reqwest::header::USER_AGENT, &identity.user_agent);

        if !identity.cookies.is_empty() {
            let cookie = identity
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(reqwest::header::COOKIE, cookie);
        }

        for (name, value) in &spec.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                TransportError::Timeout
            } else if err.is_connect() {
                TransportError::Connection(err.to_string())
            } else {
                TransportError::Other(err.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::Other(err.to_string()))?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}
