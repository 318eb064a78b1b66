//! Remote resource client
//!
//! A [`ResourceClient`] is bound to one [`Service`] and one region. Each call
//! is exactly one exchange through the [`Transport`]; nothing is retried here.
//!
//! The binding is chosen when the client is built, usually from the category
//! to be addressed ([`ResourceClient::for_category`], [`ClientSet::for_category`]).
//! A target outside the service is still refused per call, without any
//! exchange.

use crate::error::{CoreError, RawFailure, TransportFailure};
use crate::model::{Action, Category, ResourceRef, Service};
use crate::pagination::Cursor;
use crate::transport::{Request, Response, Transport};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Successful response of a single call
#[derive(Debug, Clone, PartialEq)]
pub struct RawResult {
    pub status: u16,
    pub body: Value,
}

impl RawResult {
    /// Items of a list-style response
    pub fn results(&self) -> Vec<Value> {
        self.body
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// Continuation token of a list-style response; empty strings count as absent
    pub fn continuation_token(&self) -> Option<String> {
        self.body
            .get("continuationToken")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    /// `state` field of a describe-style response
    pub fn state(&self) -> Option<&str> {
        self.body.get("state").and_then(Value::as_str)
    }
}

/// Handle for one service in one region
#[derive(Clone)]
pub struct ResourceClient {
    service: Service,
    region: String,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for ResourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceClient")
            .field("service", &self.service)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl ResourceClient {
    pub fn new(
        service: Service,
        region: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            service,
            region: region.into(),
            transport,
        }
    }

    /// Client for the service that owns `category`
    pub fn for_category(
        category: Category,
        region: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::new(category.service(), region, transport)
    }

    /// Whether this client can address resources of `category`
    pub fn addresses(&self, category: Category) -> bool {
        self.service.covers(category)
    }

    pub fn service(&self) -> Service {
        self.service
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Issue one request and return its result or raw failure
    pub async fn execute(
        &self,
        action: Action,
        target: &ResourceRef,
        parameters: &BTreeMap<String, String>,
    ) -> Result<RawResult, RawFailure> {
        self.exchange(action, target, parameters, None).await
    }

    pub(crate) async fn exchange(
        &self,
        action: Action,
        target: &ResourceRef,
        parameters: &BTreeMap<String, String>,
        continuation_token: Option<String>,
    ) -> Result<RawResult, RawFailure> {
        if !self.addresses(target.category()) {
            return Err(RawFailure::Unsupported(format!(
                "{} client cannot address {}",
                self.service, target
            )));
        }

        let request = Request::new(
            self.service,
            &self.region,
            action,
            target,
            parameters.clone(),
        )
        .with_continuation_token(continuation_token);

        tracing::debug!(
            service = %self.service,
            region = %self.region,
            "{} {}",
            action,
            target
        );

        let response = self.transport.exchange(request).await?;
        into_result(response)
    }

    /// Describe `target` and return its observed `state`
    pub async fn describe_state(&self, target: &ResourceRef) -> Result<String, RawFailure> {
        let result = self
            .execute(Action::Describe, target, &BTreeMap::new())
            .await?;
        result.state().map(str::to_string).ok_or_else(|| {
            RawFailure::transport(
                TransportFailure::Malformed,
                format!("describe response for {} has no state", target),
            )
        })
    }

    /// Start a lazy enumeration of `collection`
    pub fn list(&self, collection: ResourceRef, parameters: BTreeMap<String, String>) -> Cursor {
        Cursor::new(self.clone(), collection, parameters)
    }
}

fn into_result(response: Response) -> Result<RawResult, RawFailure> {
    if response.is_success() {
        return Ok(RawResult {
            status: response.status,
            body: response.body,
        });
    }
    let message = error_message(&response.body)
        .unwrap_or_else(|| format!("request failed with status {}", response.status));
    Err(RawFailure::remote(response.status, message))
}

fn error_message(body: &Value) -> Option<String> {
    let direct = body.get("message").and_then(Value::as_str);
    let nested = body.get("error").and_then(|e| match e {
        Value::String(s) => Some(s.as_str()),
        Value::Object(_) => e.get("message").and_then(Value::as_str),
        _ => None,
    });
    direct.or(nested).map(str::to_string)
}

/// One client per service in use
#[derive(Debug, Clone, Default)]
pub struct ClientSet {
    clients: HashMap<Service, ResourceClient>,
}

impl ClientSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clients for all three services sharing one transport
    pub fn with_transport(region: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        let region = region.into();
        let mut set = Self::new();
        for service in [Service::Compute, Service::Functions, Service::Storage] {
            set.add(ResourceClient::new(service, region.clone(), transport.clone()));
        }
        set
    }

    pub fn add(&mut self, client: ResourceClient) {
        self.clients.insert(client.service(), client);
    }

    pub fn get(&self, service: Service) -> Result<&ResourceClient, CoreError> {
        self.clients
            .get(&service)
            .ok_or(CoreError::MissingClient(service))
    }

    /// Client able to address resources of `category`
    pub fn for_category(&self, category: Category) -> Result<&ResourceClient, CoreError> {
        self.get(category.service())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use serde_json::json;

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(&json!({"message": "no such bucket"})),
            Some("no such bucket".to_string())
        );
        assert_eq!(
            error_message(&json!({"error": {"code": "X", "message": "slow down"}})),
            Some("slow down".to_string())
        );
        assert_eq!(
            error_message(&json!({"error": "denied"})),
            Some("denied".to_string())
        );
        assert_eq!(error_message(&json!({})), None);
    }

    #[test]
    fn test_into_result_maps_status() {
        let ok = into_result(Response::new(200, json!({"state": "running"}))).unwrap();
        assert_eq!(ok.state(), Some("running"));

        let err = into_result(Response::new(404, json!({"message": "gone"}))).unwrap_err();
        assert_eq!(err, RawFailure::remote(404, "gone"));
        assert!(!err.retryable());

        let err = into_result(Response::new(503, Value::Null)).unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(err.retryable());
    }

    #[test]
    fn test_empty_token_is_absent() {
        let page = RawResult {
            status: 200,
            body: json!({"results": [1, 2], "continuationToken": ""}),
        };
        assert_eq!(page.continuation_token(), None);
        assert_eq!(page.results().len(), 2);
    }

    #[tokio::test]
    async fn test_category_mismatch_makes_no_call() {
        let backend = Arc::new(MemoryBackend::new());
        let client = ResourceClient::new(Service::Compute, "eu-west-1", backend.clone());

        let err = client
            .execute(Action::Describe, &ResourceRef::bucket("b"), &BTreeMap::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RawFailure::Unsupported(_)));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_client_built_for_category() {
        let backend = Arc::new(MemoryBackend::new());
        backend.put_object("b", "k", b"data");

        let client = ResourceClient::for_category(Category::Object, "eu-west-1", backend.clone());
        assert_eq!(client.service(), Service::Storage);
        assert!(client.addresses(Category::Bucket));
        assert!(!client.addresses(Category::Instance));

        let found = client
            .execute(Action::Describe, &ResourceRef::object("b", "k"), &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(found.body["size"], 4);
    }

    #[tokio::test]
    async fn test_describe_state() {
        let backend = Arc::new(MemoryBackend::new());
        backend.put_instance("i-1", "running");
        let client = ResourceClient::new(Service::Compute, "eu-west-1", backend);

        let state = client
            .describe_state(&ResourceRef::instance("i-1"))
            .await
            .unwrap();
        assert_eq!(state, "running");

        let err = client
            .describe_state(&ResourceRef::instance("i-404"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn test_client_set_lookup() {
        let set = ClientSet::with_transport("eu-west-1", Arc::new(MemoryBackend::new()));
        assert_eq!(
            set.for_category(Category::Object).unwrap().service(),
            Service::Storage
        );

        let empty = ClientSet::new();
        assert!(matches!(
            empty.get(Service::Compute),
            Err(CoreError::MissingClient(Service::Compute))
        ));
    }
}
