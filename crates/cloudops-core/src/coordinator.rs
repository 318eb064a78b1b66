//! Compound operation coordinator
//!
//! [`Coordinator::run`] executes an ordered list of [`OperationStep`]s and
//! returns an [`OutcomeRecord`]. Execution stops at the first failure. Steps
//! that already completed are reported, never rolled back; a compensating
//! action has to be planned explicitly by the caller.
//!
//! Some steps are only complete once the resource is ready (a new bucket
//! must be `available`). The [`ReadinessPolicy`] decides which steps carry an
//! implicit wait; a failed or timed out wait fails the step.

use crate::cancel::or_cancelled;
use crate::client::{ClientSet, ResourceClient};
use crate::error::{
    ClassifiedError, ErrorKind, PageError, RawFailure, TransportFailure, WaitError, classify,
};
use crate::model::{Action, Category, OperationStep, ResourceRef};
use crate::waiter::{WaitSpec, wait_for_state};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Step parameter asking the coordinator to wait for the resource to settle.
/// It is consumed locally and never sent to the remote side.
pub const WAIT_PARAM: &str = "wait";

/// A step that finished, with the body the remote side answered
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedStep {
    pub step: OperationStep,
    pub response: Value,
}

/// Result of a compound operation
///
/// A failed record is a normal return value. `failed_step` is set when the
/// run stopped early; `cause` explains why unless the run was cancelled.
/// `failed_response` holds the body of a failed step whose call was
/// accepted before the step failed, e.g. a create whose resource never
/// became ready.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    completed_steps: Vec<CompletedStep>,
    failed_step: Option<OperationStep>,
    cause: Option<ClassifiedError>,
    failed_response: Option<Value>,
    cancelled: bool,
}

impl OutcomeRecord {
    pub fn completed_steps(&self) -> &[CompletedStep] {
        &self.completed_steps
    }

    pub fn failed_step(&self) -> Option<&OperationStep> {
        self.failed_step.as_ref()
    }

    pub fn cause(&self) -> Option<&ClassifiedError> {
        self.cause.as_ref()
    }

    /// Body of the failed step's accepted call, if it got that far
    pub fn failed_response(&self) -> Option<&Value> {
        self.failed_response.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Every step completed
    pub fn is_success(&self) -> bool {
        self.failed_step.is_none()
    }

    /// Stopped after at least one call took effect
    pub fn is_partial(&self) -> bool {
        !self.is_success() && (!self.completed_steps.is_empty() || self.failed_response.is_some())
    }

    /// Response of the last completed step
    pub fn last_response(&self) -> Option<&Value> {
        self.completed_steps.last().map(|c| &c.response)
    }

    fn stop(mut self, step: OperationStep, failure: StepError) -> Self {
        self.cause = match failure.failure {
            StepFailure::Failed(cause) => Some(cause),
            StepFailure::Cancelled => None,
        };
        self.cancelled = self.cause.is_none();
        self.failed_step = Some(step);
        self.failed_response = failure.response;
        self
    }
}

/// Which steps need an implicit wait, and how long to wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }
}

impl ReadinessPolicy {
    /// State a step's target must reach before the step counts as complete
    pub fn desired_state(&self, step: &OperationStep) -> Option<&'static str> {
        let requested = step.param(WAIT_PARAM) == Some("true");
        match (step.action(), step.target().category()) {
            (Action::Create, Category::Bucket) => Some("available"),
            (Action::Create | Action::Start | Action::Reboot, Category::Instance) if requested => {
                Some("running")
            }
            (Action::Stop, Category::Instance) if requested => Some("stopped"),
            (Action::Terminate, Category::Instance) if requested => Some("terminated"),
            _ => None,
        }
    }
}

enum StepFailure {
    Failed(ClassifiedError),
    Cancelled,
}

impl From<RawFailure> for StepFailure {
    fn from(raw: RawFailure) -> Self {
        StepFailure::Failed(classify(&raw))
    }
}

/// A failed step, with the body of its call when the remote side accepted it
struct StepError {
    failure: StepFailure,
    response: Option<Value>,
}

impl StepError {
    fn after(failure: impl Into<StepFailure>, response: Value) -> Self {
        Self {
            failure: failure.into(),
            response: Some(response),
        }
    }
}

impl From<StepFailure> for StepError {
    fn from(failure: StepFailure) -> Self {
        Self {
            failure,
            response: None,
        }
    }
}

impl From<RawFailure> for StepError {
    fn from(raw: RawFailure) -> Self {
        StepFailure::from(raw).into()
    }
}

/// Runs compound operations against a set of clients
#[derive(Debug, Clone)]
pub struct Coordinator {
    clients: ClientSet,
    readiness: ReadinessPolicy,
}

impl Coordinator {
    pub fn new(clients: ClientSet) -> Self {
        Self {
            clients,
            readiness: ReadinessPolicy::default(),
        }
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn clients(&self) -> &ClientSet {
        &self.clients
    }

    pub async fn run(&self, steps: Vec<OperationStep>) -> OutcomeRecord {
        self.run_with_cancellation(steps, &CancellationToken::new())
            .await
    }

    /// Run `steps` in order, stopping at the first failure or on cancellation
    pub async fn run_with_cancellation(
        &self,
        steps: Vec<OperationStep>,
        cancel: &CancellationToken,
    ) -> OutcomeRecord {
        let total = steps.len();
        let mut record = OutcomeRecord::default();
        let mut created: HashMap<Category, String> = HashMap::new();

        for (index, step) in steps.into_iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!("cancelled before step {}/{}: {}", index + 1, total, step);
                return record.stop(step, StepFailure::Cancelled.into());
            }

            match self.run_step(&step, &mut created, cancel).await {
                Ok(response) => {
                    tracing::info!("step {}/{} completed: {}", index + 1, total, step);
                    record.completed_steps.push(CompletedStep { step, response });
                }
                Err(failure) => {
                    match &failure.failure {
                        StepFailure::Failed(cause) => tracing::warn!(
                            kind = %cause.kind,
                            completed = record.completed_steps.len(),
                            accepted = failure.response.is_some(),
                            "step {}/{} failed: {}: {}",
                            index + 1,
                            total,
                            step,
                            cause.message
                        ),
                        StepFailure::Cancelled => tracing::warn!(
                            accepted = failure.response.is_some(),
                            "cancelled during step {}/{}: {}",
                            index + 1,
                            total,
                            step
                        ),
                    }
                    return record.stop(step, failure);
                }
            }
        }

        record
    }

    async fn run_step(
        &self,
        step: &OperationStep,
        created: &mut HashMap<Category, String>,
        cancel: &CancellationToken,
    ) -> Result<Value, StepError> {
        let action = step.action();
        let target = resolve_target(step, created)?;
        let client = self.clients.for_category(target.category()).map_err(|e| {
            StepFailure::Failed(ClassifiedError::new(
                ErrorKind::Unknown,
                None,
                e.to_string(),
                false,
            ))
        })?;

        let mut parameters = step.parameters().clone();
        parameters.remove(WAIT_PARAM);

        let response = if action == Action::List {
            list_all(client, target.clone(), parameters, cancel).await?
        } else {
            match or_cancelled(cancel, client.execute(action, &target, &parameters)).await {
                None => return Err(StepFailure::Cancelled.into()),
                Some(result) => result?.body,
            }
        };

        let mut ready_target = target;
        if action == Action::Create && ready_target.is_collection() {
            let Some(id) = created_identifier(&response) else {
                let raw = RawFailure::transport(
                    TransportFailure::Malformed,
                    format!("create response for {} carries no identifier", step.target()),
                );
                return Err(StepError::after(raw, response));
            };
            ready_target = ready_target.with_identifier(id.clone());
            created.insert(ready_target.category(), id);
        }

        if let Some(state) = self.readiness.desired_state(step) {
            if let Err(failure) = self.await_ready(client, ready_target, state, cancel).await {
                return Err(StepError::after(failure, response));
            }
        }

        Ok(response)
    }

    async fn await_ready(
        &self,
        client: &ResourceClient,
        target: ResourceRef,
        state: &str,
        cancel: &CancellationToken,
    ) -> Result<(), StepFailure> {
        let spec = WaitSpec::new(
            target.clone(),
            [state],
            self.readiness.poll_interval,
            self.readiness.timeout,
        )
        .map_err(|e| {
            StepFailure::Failed(ClassifiedError::new(
                ErrorKind::Unknown,
                None,
                e.to_string(),
                false,
            ))
        })?;

        match wait_for_state(client, &spec, cancel).await {
            Ok(observed) => {
                tracing::debug!(polls = observed.polls, "{} is {}", target, observed.state);
                Ok(())
            }
            Err(WaitError::Failed(cause)) => Err(StepFailure::Failed(cause)),
            Err(WaitError::Timeout { last_observed }) => {
                Err(StepFailure::Failed(ClassifiedError::new(
                    ErrorKind::Transient,
                    None,
                    format!(
                        "{} did not become {} within {:?} (last observed: {})",
                        target,
                        state,
                        self.readiness.timeout,
                        last_observed.as_deref().unwrap_or("none")
                    ),
                    true,
                )))
            }
            Err(WaitError::Cancelled) => Err(StepFailure::Cancelled),
        }
    }
}

async fn list_all(
    client: &ResourceClient,
    collection: ResourceRef,
    parameters: BTreeMap<String, String>,
    cancel: &CancellationToken,
) -> Result<Value, StepFailure> {
    let cursor = client
        .list(collection, parameters)
        .with_cancellation(cancel.clone());
    match cursor.collect_all().await {
        Ok(results) => Ok(json!({ "results": results })),
        Err(PageError::Remote(raw)) => Err(raw.into()),
        Err(PageError::Cancelled) => Err(StepFailure::Cancelled),
    }
}

/// A collection-level target on a per-resource action refers to the resource
/// created earlier in the same run.
fn resolve_target(
    step: &OperationStep,
    created: &HashMap<Category, String>,
) -> Result<ResourceRef, StepFailure> {
    let target = step.target();
    if !target.is_collection() || matches!(step.action(), Action::List | Action::Create) {
        return Ok(target.clone());
    }
    created
        .get(&target.category())
        .map(|id| target.with_identifier(id.clone()))
        .ok_or_else(|| {
            StepFailure::Failed(ClassifiedError::new(
                ErrorKind::Unknown,
                None,
                format!("{} has no resource created earlier in this operation", step),
                false,
            ))
        })
}

fn created_identifier(response: &Value) -> Option<String> {
    ["id", "name"]
        .iter()
        .find_map(|field| response.get(*field).and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::model::Service;
    use crate::plans;
    use crate::transport::stalled::StalledTransport;
    use std::sync::Arc;

    fn coordinator(backend: &Arc<MemoryBackend>) -> Coordinator {
        Coordinator::new(ClientSet::with_transport("eu-west-1", backend.clone()))
    }

    #[tokio::test]
    async fn test_move_removes_source() {
        let backend = Arc::new(MemoryBackend::new());
        backend.put_object("src", "report.csv", b"a,b");
        backend.put_bucket("dst");

        let record = coordinator(&backend)
            .run(plans::move_object("src", "report.csv", "dst", "report.csv").unwrap())
            .await;

        assert!(record.is_success());
        assert_eq!(record.completed_steps().len(), 2);
        assert!(!backend.has_object("src", "report.csv"));
        assert_eq!(backend.object_body("dst", "report.csv"), Some(b"a,b".to_vec()));
    }

    #[tokio::test]
    async fn test_later_failure_keeps_completed_steps() {
        let backend = Arc::new(MemoryBackend::new());
        backend.put_object("src", "k", b"x");
        backend.put_bucket("dst");

        let copy = OperationStep::new(Action::Copy, ResourceRef::object("dst", "k"))
            .with_param("source_bucket", "src")
            .with_param("source_key", "k");
        let create = OperationStep::new(Action::Create, ResourceRef::bucket("dst"));

        let record = coordinator(&backend)
            .run(vec![copy.clone(), create.clone()])
            .await;

        assert!(record.is_partial());
        assert_eq!(record.completed_steps()[0].step, copy);
        assert_eq!(record.failed_step(), Some(&create));
        assert_eq!(record.cause().map(|c| c.kind), Some(ErrorKind::Conflict));
        assert!(!record.is_cancelled());
        // copy is not rolled back
        assert!(backend.has_object("dst", "k"));
    }

    #[tokio::test]
    async fn test_first_step_failure_stops_run() {
        let backend = Arc::new(MemoryBackend::new());
        backend.put_bucket("dst");

        let record = coordinator(&backend)
            .run(plans::move_object("src", "missing", "dst", "missing").unwrap())
            .await;

        assert!(!record.is_success());
        assert!(!record.is_partial());
        assert_eq!(record.failed_step().map(|s| s.action()), Some(Action::Copy));
        assert_eq!(record.cause().map(|c| c.kind), Some(ErrorKind::NotFound));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_bucket_waits_until_available() {
        let backend = Arc::new(MemoryBackend::new());

        let record = coordinator(&backend).run(plans::create_bucket("media")).await;

        assert!(record.is_success());
        // create, then describe "creating", then describe "available"
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_timeout_is_transient() {
        let backend = Arc::new(MemoryBackend::new());
        backend.script_states(Category::Bucket, "media", ["creating"]);
        let policy = ReadinessPolicy {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(3),
        };

        let record = coordinator(&backend)
            .with_readiness(policy)
            .run(plans::create_bucket("media"))
            .await;

        let cause = record.cause().unwrap();
        assert_eq!(cause.kind, ErrorKind::Transient);
        assert!(cause.retryable);
        assert!(cause.message.contains("creating"));
        assert!(record.completed_steps().is_empty());
        // the create was accepted even though the bucket never settled
        assert_eq!(record.failed_response().unwrap()["name"], "media");
        assert!(record.is_partial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unready_instance_keeps_its_identifier() {
        let backend = Arc::new(MemoryBackend::new());
        backend.script_states(Category::Instance, "i-00000001", ["pending"]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            trigger.cancel();
        });

        let record = coordinator(&backend)
            .run_with_cancellation(plans::create_instance("img-1", "small", "web", true), &cancel)
            .await;

        assert!(record.is_cancelled());
        assert!(record.is_partial());
        assert!(record.completed_steps().is_empty());
        assert_eq!(record.failed_response().unwrap()["id"], "i-00000001");

        let report = serde_json::to_value(&record).unwrap();
        assert_eq!(report["failedResponse"]["id"], "i-00000001");
    }

    #[tokio::test(start_paused = true)]
    async fn test_created_instance_is_tagged() {
        let backend = Arc::new(MemoryBackend::new());

        let record = coordinator(&backend)
            .run(plans::create_instance("img-1", "small", "web", true))
            .await;

        assert!(record.is_success());
        let id = record.completed_steps()[0].response["id"].as_str().unwrap();
        let tagged = &record.completed_steps()[1].response;
        assert_eq!(tagged["id"], id);
        assert_eq!(tagged["tags"]["Name"], "web");
    }

    #[tokio::test]
    async fn test_stop_with_wait_polls_until_stopped() {
        let backend = Arc::new(MemoryBackend::new());
        backend.put_instance("i-1", "running");
        let policy = ReadinessPolicy {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        };

        let record = coordinator(&backend)
            .with_readiness(policy)
            .run(plans::instance_action(Action::Stop, "i-1", true))
            .await;

        assert!(record.is_success());
        assert_eq!(record.completed_steps()[0].response["currentState"], "stopping");
        // stop, describe "stopping", describe "stopped"
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_list_step_drains_every_page() {
        let backend = Arc::new(MemoryBackend::new());
        for i in 0..5 {
            backend.put_object("logs", &format!("k{}", i), b"x");
        }
        let step = OperationStep::new(
            Action::List,
            ResourceRef::collection(Category::Object, Some(ResourceRef::bucket("logs"))),
        )
        .with_param(crate::pagination::PAGE_SIZE_PARAM, "2");

        let record = coordinator(&backend).run(vec![step]).await;

        let results = record.last_response().unwrap()["results"].as_array().unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let backend = Arc::new(MemoryBackend::new());
        backend.put_object("src", "k", b"x");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let steps = plans::move_object("src", "k", "dst", "k").unwrap();
        let record = coordinator(&backend)
            .run_with_cancellation(steps.clone(), &cancel)
            .await;

        assert!(record.is_cancelled());
        assert_eq!(record.failed_step(), Some(&steps[0]));
        assert!(record.cause().is_none());
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_readiness_wait() {
        let backend = Arc::new(MemoryBackend::new());
        backend.script_states(Category::Bucket, "media", ["creating"]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            trigger.cancel();
        });

        let record = coordinator(&backend)
            .run_with_cancellation(plans::create_bucket("media"), &cancel)
            .await;

        assert!(record.is_cancelled());
        assert!(record.completed_steps().is_empty());
        assert_eq!(record.failed_step().map(|s| s.action()), Some(Action::Create));
        assert_eq!(record.failed_response().unwrap()["name"], "media");
    }

    #[tokio::test]
    async fn test_missing_client_fails_step() {
        let backend = Arc::new(MemoryBackend::new());
        let mut clients = ClientSet::new();
        clients.add(ResourceClient::new(Service::Compute, "eu-west-1", backend.clone()));

        let record = Coordinator::new(clients)
            .run(plans::delete_bucket("b"))
            .await;

        assert_eq!(record.cause().map(|c| c.kind), Some(ErrorKind::Unknown));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_tag_without_created_instance_is_refused() {
        let backend = Arc::new(MemoryBackend::new());
        let step =
            OperationStep::new(Action::Tag, ResourceRef::collection(Category::Instance, None))
                .with_param("key", "Name")
                .with_param("value", "web");

        let record = coordinator(&backend).run(vec![step]).await;

        assert_eq!(record.cause().map(|c| c.kind), Some(ErrorKind::Unknown));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_step_in_flight() {
        let transport = Arc::new(StalledTransport::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let steps = plans::delete_object("b", "k");
        let record = Coordinator::new(ClientSet::with_transport("eu-west-1", transport.clone()))
            .run_with_cancellation(steps.clone(), &cancel)
            .await;

        assert!(record.is_cancelled());
        assert!(record.cause().is_none());
        assert_eq!(record.failed_step(), Some(&steps[0]));
        assert!(record.failed_response().is_none());
        assert!(!record.is_partial());
        assert_eq!(transport.calls(), 1);
    }
}
