//! HTTP transport for the CloudOps management API
//!
//! Every [`Request`] is sent as one JSON `POST` to
//! `{endpoint}/{service}/{category}/{action}` with bearer authentication.
//! The response status is passed through untouched; only failures to obtain
//! a well-formed response become [`RawFailure::Transport`].

pub mod error;

pub use error::{HttpError, Result};

use async_trait::async_trait;
use cloudops_core::{RawFailure, Request, Response, Transport, TransportFailure};
use serde_json::{Value, json};
use std::time::Duration;

/// Connection settings for [`HttpTransport`]
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub endpoint: String,
    pub token: Option<String>,
    pub request_timeout: Duration,
}

impl HttpConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// reqwest-backed [`Transport`]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(HttpError::InvalidEndpoint(config.endpoint));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            token: config.token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, request: &Request) -> String {
        format!(
            "{}/{}/{}/{}",
            self.endpoint, request.service, request.category, request.action
        )
    }
}

fn transport_failure(err: reqwest::Error) -> RawFailure {
    let reason = if err.is_timeout() {
        TransportFailure::Timeout
    } else if err.is_decode() || err.is_body() {
        TransportFailure::Malformed
    } else {
        TransportFailure::ConnectionRefused
    };
    RawFailure::transport(reason, err.to_string())
}

/// Parse a response body; error statuses may carry plain text
fn parse_body(status: u16, text: &str) -> std::result::Result<Value, RawFailure> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    match serde_json::from_str(text) {
        Ok(body) => Ok(body),
        Err(_) if !(200..300).contains(&status) => Ok(json!({ "message": text.trim() })),
        Err(e) => Err(RawFailure::transport(
            TransportFailure::Malformed,
            format!("response body is not JSON: {}", e),
        )),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn exchange(&self, request: Request) -> std::result::Result<Response, RawFailure> {
        let url = self.url(&request);
        tracing::trace!(%url, "sending request");

        let mut builder = self.client.post(&url).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(transport_failure)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(transport_failure)?;

        tracing::trace!(%url, status, "received response");
        Ok(Response::new(status, parse_body(status, &text)?))
    }
}
