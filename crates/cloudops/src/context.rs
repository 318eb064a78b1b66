use crate::output::Output;
use cloudops_config::Config;
use cloudops_core::{
    Action, CancellationToken, ClientSet, Coordinator, OperationStep, OutcomeRecord, PageError,
    ReadinessPolicy, ResourceClient, ResourceRef, RetryConfig, RetryError, Transport, classify,
    with_retries,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything a command handler needs
pub struct Context {
    pub config: Config,
    pub output: Output,
    pub cancel: CancellationToken,
    coordinator: Coordinator,
    retry: RetryConfig,
}

impl Context {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        json: bool,
        cancel: CancellationToken,
    ) -> Self {
        let clients = ClientSet::with_transport(config.region.clone(), transport);
        let readiness = ReadinessPolicy {
            poll_interval: config.wait.poll_interval(),
            timeout: config.wait.timeout(),
        };
        Self {
            coordinator: Coordinator::new(clients).with_readiness(readiness),
            output: Output::new(json),
            retry: RetryConfig::default(),
            config,
            cancel,
        }
    }

    pub fn client(&self, target: &ResourceRef) -> anyhow::Result<&ResourceClient> {
        Ok(self.coordinator.clients().for_category(target.category())?)
    }

    /// Run a compound operation and report its outcome
    pub async fn run(
        &self,
        steps: Vec<OperationStep>,
        summary: &str,
    ) -> anyhow::Result<OutcomeRecord> {
        let record = self
            .coordinator
            .run_with_cancellation(steps, &self.cancel)
            .await;
        self.output.outcome(&record, summary)?;
        Ok(record)
    }

    /// Fetch every item of a collection, page by page
    pub async fn list(&self, collection: ResourceRef) -> anyhow::Result<Vec<Value>> {
        let mut cursor = self
            .client(&collection)?
            .list(collection.clone(), BTreeMap::new())
            .with_page_size(self.config.page_size)
            .with_cancellation(self.cancel.clone());

        let mut items = Vec::new();
        while let Some(page) = cursor.next_page().await {
            match page {
                Ok(page) => {
                    tracing::debug!(
                        page = page.number,
                        count = page.results.len(),
                        "page received"
                    );
                    items.extend(page.results);
                }
                Err(PageError::Cancelled) => anyhow::bail!("listing {} cancelled", collection),
                Err(PageError::Remote(raw)) => {
                    let err = classify(&raw);
                    anyhow::bail!("{}: listing {} failed: {}", err.kind, collection, err.message)
                }
            }
        }
        Ok(items)
    }

    /// Describe one resource, retrying transient failures
    pub async fn describe(&self, target: &ResourceRef) -> anyhow::Result<Value> {
        self.call(Action::Describe, target).await
    }

    /// Single call with caller-side retry (idempotent actions only)
    pub async fn call(&self, action: Action, target: &ResourceRef) -> anyhow::Result<Value> {
        let client = self.client(target)?;
        let params = &BTreeMap::new();
        let result = with_retries(&self.retry, action, &self.cancel, move || {
            client.execute(action, target, params)
        })
        .await;
        match result {
            Ok(result) => Ok(result.body),
            Err(RetryError::Cancelled) => anyhow::bail!("{} {} cancelled", action, target),
            Err(RetryError::Failed(err)) => {
                anyhow::bail!("{}: {} {} failed: {}", err.kind, action, target, err.message)
            }
        }
    }
}
