//! HTTP plumbing shared by every request the client makes.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT},
    Client, RequestBuilder, StatusCode,
};
use serde_json::Value;
use shared::error::ApiException;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientSettings;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },
    #[error("unauthenticated request to {url}")]
    Unauthenticated { url: String },
    #[error("request to {url} was rejected: {source}")]
    Status {
        url: String,
        #[source]
        source: ApiException,
    },
    #[error("invalid response body from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("invalid request url '{url}': {message}")]
    InvalidUrl { url: String, message: String },
    #[error("transport is unavailable")]
    Unavailable,
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthenticated { .. } => Some(401),
            Self::Status { source, .. } => Some(source.status),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, TransportError>;
    async fn get_json(&self, path: &str) -> Result<Value, TransportError>;
}

pub struct MissingTransport;

#[async_trait]
impl Transport for MissingTransport {
    async fn post_json(&self, _path: &str, _body: &Value) -> Result<Value, TransportError> {
        Err(TransportError::Unavailable)
    }

    async fn get_json(&self, _path: &str) -> Result<Value, TransportError> {
        Err(TransportError::Unavailable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSignal {
    Unauthenticated { url: String },
}

/// Process-wide channel on which the transport announces authentication failures.
#[derive(Debug, Clone)]
pub struct AuthSignals {
    tx: broadcast::Sender<AuthSignal>,
}

impl AuthSignals {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthSignal> {
        self.tx.subscribe()
    }

    pub fn emit(&self, signal: AuthSignal) {
        // Nobody listening is fine.
        let _ = self.tx.send(signal);
    }
}

impl Default for AuthSignals {
    fn default() -> Self {
        Self::new()
    }
}

pub struct HttpTransport {
    http: Client,
    base_url: String,
    auth: AuthSignals,
}

impl HttpTransport {
    pub fn new(settings: &ClientSettings) -> anyhow::Result<Self> {
        Self::with_auth_signals(settings, AuthSignals::new())
    }

    pub fn with_auth_signals(settings: &ClientSettings, auth: AuthSignals) -> anyhow::Result<Self> {
        Url::parse(&settings.api_base_url)
            .with_context(|| format!("invalid api base url: {}", settings.api_base_url))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let http = Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .timeout(settings.request_timeout())
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            http,
            base_url: settings.api_base_url.clone(),
            auth,
        })
    }

    pub fn auth_signals(&self) -> AuthSignals {
        self.auth.clone()
    }

    async fn execute(&self, request: RequestBuilder, url: Url) -> Result<Value, TransportError> {
        let response = request
            .send()
            .await
            .map_err(|err| network_error(&url, err))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| network_error(&url, err))?;
        debug!(url = %url, status = status.as_u16(), bytes = body.len(), "transport: response");

        if status == StatusCode::UNAUTHORIZED {
            warn!(url = %url, "transport: unauthenticated response");
            self.auth.emit(AuthSignal::Unauthenticated {
                url: url.to_string(),
            });
            return Err(TransportError::Unauthenticated {
                url: url.to_string(),
            });
        }

        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                source: ApiException::from_body(status.as_u16(), &body),
            });
        }

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&body).map_err(|err| TransportError::Decode {
            url: url.to_string(),
            message: err.to_string(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, TransportError> {
        let url = resolve_url(&self.base_url, path)?;
        let request = self.http.post(url.clone()).json(body);
        self.execute(request, url).await
    }

    async fn get_json(&self, path: &str) -> Result<Value, TransportError> {
        let url = resolve_url(&self.base_url, path)?;
        let request = self.http.get(url.clone());
        self.execute(request, url).await
    }
}

fn network_error(url: &Url, err: reqwest::Error) -> TransportError {
    let message = if err.is_timeout() {
        format!("timed out: {err}")
    } else {
        err.to_string()
    };
    TransportError::Network {
        url: url.to_string(),
        message,
    }
}

/// Joins `path` onto the base URL the way a browser HTTP client does: one slash
/// between them, absolute URLs left untouched.
pub(crate) fn resolve_url(base_url: &str, path: &str) -> Result<Url, TransportError> {
    let joined = if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else if path.is_empty() {
        base_url.to_string()
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };

    Url::parse(&joined).map_err(|err| TransportError::InvalidUrl {
        url: joined.clone(),
        message: err.to_string(),
    })
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
