//! Boundary to the remote management API
//!
//! A [`Transport`] performs exactly one request/response exchange. It never
//! retries and never interprets the status code; that is the client's job.

use crate::error::RawFailure;
use crate::model::{Action, Category, ResourceRef, Service};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single logical request to the remote side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub service: Service,
    pub region: String,
    pub action: Action,
    pub category: Category,
    /// Empty for collection-level requests (list, create without a name)
    pub identifier: String,
    /// Identifier of the parent resource (an object's bucket)
    pub parent: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub continuation_token: Option<String>,
}

impl Request {
    pub fn new(
        service: Service,
        region: impl Into<String>,
        action: Action,
        target: &ResourceRef,
        parameters: BTreeMap<String, String>,
    ) -> Self {
        Self {
            service,
            region: region.into(),
            action,
            category: target.category(),
            identifier: target.identifier().to_string(),
            parent: target.parent().map(|p| p.identifier().to_string()),
            parameters,
            continuation_token: None,
        }
    }

    pub fn with_continuation_token(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }
}

/// A well-formed answer from the remote side, successful or not
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: serde_json::Value,
}

impl Response {
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One network exchange with the remote management API
///
/// Transport-level failures (connection refused, timeout, malformed body)
/// are returned as [`RawFailure::Transport`]; error statuses come back as an
/// ordinary [`Response`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(&self, request: Request) -> Result<Response, RawFailure>;
}
