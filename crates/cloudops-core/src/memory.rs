//! In-process backend
//!
//! [`MemoryBackend`] implements [`Transport`] over plain maps of instances,
//! functions, buckets and objects. Resources created or started through the
//! API move through a transitional state that settles on the next describe,
//! which is enough to exercise waiters. Failures can be injected per action
//! and category.

use crate::error::RawFailure;
use crate::model::{Action, Category};
use crate::pagination::PAGE_SIZE_PARAM;
use crate::transport::{Request, Response, Transport};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

const DEFAULT_PAGE_SIZE: usize = 1000;
const TOKEN_PREFIX: &str = "offset-";

#[derive(Debug, Clone)]
struct Lifecycle {
    state: String,
    settles_to: Option<String>,
}

impl Lifecycle {
    fn fixed(state: &str) -> Self {
        Self {
            state: state.to_string(),
            settles_to: None,
        }
    }

    fn moving(from: &str, to: &str) -> Self {
        Self {
            state: from.to_string(),
            settles_to: Some(to.to_string()),
        }
    }

    /// Report the current state, then advance a pending transition
    fn observe(&mut self) -> String {
        let seen = self.state.clone();
        if let Some(next) = self.settles_to.take() {
            self.state = next;
        }
        seen
    }
}

#[derive(Debug, Clone)]
struct InstanceRecord {
    lifecycle: Lifecycle,
    image: String,
    instance_type: String,
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
struct FunctionRecord {
    configuration: BTreeMap<String, String>,
    code: String,
    version: u32,
}

#[derive(Debug, Clone)]
struct BucketRecord {
    lifecycle: Lifecycle,
    objects: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Next,
    Nth(usize),
}

#[derive(Debug, Clone)]
struct Fault {
    action: Action,
    category: Category,
    trigger: Trigger,
    status: u16,
}

#[derive(Debug, Default)]
struct Store {
    instances: BTreeMap<String, InstanceRecord>,
    functions: BTreeMap<String, FunctionRecord>,
    buckets: BTreeMap<String, BucketRecord>,
    scripts: HashMap<(Category, String), VecDeque<String>>,
    faults: Vec<Fault>,
    counts: HashMap<(Action, Category), usize>,
    next_instance: u32,
}

/// In-memory implementation of the remote management API
#[derive(Debug, Default)]
pub struct MemoryBackend {
    store: Mutex<Store>,
    calls: AtomicUsize,
}

type Outcome = Result<Value, (u16, String)>;

fn not_found(what: impl std::fmt::Display) -> (u16, String) {
    (404, format!("{} does not exist", what))
}

fn conflict(what: impl std::fmt::Display) -> (u16, String) {
    (409, format!("{} already exists", what))
}

fn bad_request(message: impl Into<String>) -> (u16, String) {
    (400, message.into())
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of exchanges received so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn put_instance(&self, id: &str, state: &str) {
        self.lock().instances.insert(
            id.to_string(),
            InstanceRecord {
                lifecycle: Lifecycle::fixed(state),
                image: "img-default".to_string(),
                instance_type: "small".to_string(),
                tags: BTreeMap::new(),
            },
        );
    }

    pub fn put_function(&self, name: &str) {
        self.lock()
            .functions
            .insert(name.to_string(), FunctionRecord::default());
    }

    pub fn put_bucket(&self, name: &str) {
        self.lock().buckets.insert(
            name.to_string(),
            BucketRecord {
                lifecycle: Lifecycle::fixed("available"),
                objects: BTreeMap::new(),
            },
        );
    }

    /// Store an object, creating its bucket if needed
    pub fn put_object(&self, bucket: &str, key: &str, body: &[u8]) {
        let mut store = self.lock();
        store
            .buckets
            .entry(bucket.to_string())
            .or_insert_with(|| BucketRecord {
                lifecycle: Lifecycle::fixed("available"),
                objects: BTreeMap::new(),
            })
            .objects
            .insert(key.to_string(), body.to_vec());
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.lock().buckets.contains_key(bucket)
    }

    pub fn has_object(&self, bucket: &str, key: &str) -> bool {
        self.lock()
            .buckets
            .get(bucket)
            .is_some_and(|b| b.objects.contains_key(key))
    }

    pub fn object_body(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key).cloned())
    }

    /// Describe calls on `identifier` report these states in order; the
    /// last one sticks.
    pub fn script_states<I, S>(&self, category: Category, identifier: &str, states: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().scripts.insert(
            (category, identifier.to_string()),
            states.into_iter().map(Into::into).collect(),
        );
    }

    /// Fail the next matching call with `status`
    pub fn fail_next(&self, action: Action, category: Category, status: u16) {
        self.lock().faults.push(Fault {
            action,
            category,
            trigger: Trigger::Next,
            status,
        });
    }

    /// Fail the `n`-th matching call (1-based, counted from creation)
    pub fn fail_nth(&self, action: Action, category: Category, n: usize, status: u16) {
        self.lock().faults.push(Fault {
            action,
            category,
            trigger: Trigger::Nth(n),
            status,
        });
    }
}

#[async_trait]
impl Transport for MemoryBackend {
    async fn exchange(&self, request: Request) -> Result<Response, RawFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut store = self.lock();

        let key = (request.action, request.category);
        let count = {
            let entry = store.counts.entry(key).or_insert(0);
            *entry += 1;
            *entry
        };

        let fault = store.faults.iter().position(|f| {
            f.action == request.action
                && f.category == request.category
                && match f.trigger {
                    Trigger::Next => true,
                    Trigger::Nth(n) => n == count,
                }
        });
        if let Some(index) = fault {
            let fault = store.faults.remove(index);
            return Ok(Response::new(
                fault.status,
                json!({ "message": "injected failure" }),
            ));
        }

        let outcome = store.handle(&request);
        Ok(match outcome {
            Ok(body) => Response::new(200, body),
            Err((status, message)) => Response::new(status, json!({ "message": message })),
        })
    }
}

impl Store {
    fn handle(&mut self, req: &Request) -> Outcome {
        match req.category {
            Category::Instance => self.instance(req),
            Category::Function => self.function(req),
            Category::Bucket => self.bucket(req),
            Category::Object => self.object(req),
        }
    }

    fn scripted(&mut self, category: Category, id: &str) -> Option<String> {
        let script = self.scripts.get_mut(&(category, id.to_string()))?;
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }

    fn instance(&mut self, req: &Request) -> Outcome {
        let id = req.identifier.as_str();
        let scripted = match req.action {
            Action::Describe => self.scripted(Category::Instance, id),
            _ => None,
        };

        match req.action {
            Action::List => {
                let all: Vec<Value> = self
                    .instances
                    .iter()
                    .map(|(id, r)| instance_json(id, r, &r.lifecycle.state))
                    .collect();
                paginate(all, req)
            }
            Action::Create => {
                self.next_instance += 1;
                let id = format!("i-{:08x}", self.next_instance);
                let record = InstanceRecord {
                    lifecycle: Lifecycle::moving("pending", "running"),
                    image: param_or(req, "image", "img-default"),
                    instance_type: param_or(req, "type", "small"),
                    tags: BTreeMap::new(),
                };
                let body = instance_json(&id, &record, &record.lifecycle.state);
                self.instances.insert(id, record);
                Ok(body)
            }
            _ => {
                let record = self
                    .instances
                    .get_mut(id)
                    .ok_or_else(|| not_found(format!("instance {}", id)))?;
                match req.action {
                    Action::Describe => {
                        let state = record.lifecycle.observe();
                        let state = scripted.unwrap_or(state);
                        Ok(instance_json(id, record, &state))
                    }
                    Action::Start => transition(&mut record.lifecycle, "pending", "running"),
                    Action::Stop => transition(&mut record.lifecycle, "stopping", "stopped"),
                    Action::Reboot => transition(&mut record.lifecycle, "rebooting", "running"),
                    Action::Terminate => {
                        transition(&mut record.lifecycle, "shutting-down", "terminated")
                    }
                    Action::Tag => {
                        let key = required(req, "key")?;
                        let value = required(req, "value")?;
                        record.tags.insert(key, value);
                        Ok(json!({ "id": id, "tags": record.tags }))
                    }
                    other => Err(bad_request(format!("{} is not supported on instances", other))),
                }
            }
        }
    }

    fn function(&mut self, req: &Request) -> Outcome {
        let name = req.identifier.as_str();
        match req.action {
            Action::List => {
                let all = self
                    .functions
                    .iter()
                    .map(|(name, f)| function_json(name, f))
                    .collect();
                paginate(all, req)
            }
            Action::Create => {
                if self.functions.contains_key(name) {
                    return Err(conflict(format!("function {}", name)));
                }
                let mut configuration = req.parameters.clone();
                let code = configuration.remove("code").unwrap_or_default();
                let record = FunctionRecord {
                    configuration,
                    code,
                    version: 1,
                };
                let body = function_json(name, &record);
                self.functions.insert(name.to_string(), record);
                Ok(body)
            }
            Action::Delete => self
                .functions
                .remove(name)
                .map(|_| json!({ "name": name }))
                .ok_or_else(|| not_found(format!("function {}", name))),
            _ => {
                let record = self
                    .functions
                    .get_mut(name)
                    .ok_or_else(|| not_found(format!("function {}", name)))?;
                match req.action {
                    Action::Describe => Ok(function_json(name, record)),
                    Action::Update => {
                        record.configuration.extend(req.parameters.clone());
                        record.version += 1;
                        Ok(function_json(name, record))
                    }
                    Action::UpdateCode => {
                        record.code = required(req, "code")?;
                        record.version += 1;
                        Ok(function_json(name, record))
                    }
                    Action::Invoke => Ok(json!({
                        "statusCode": 200,
                        "executedVersion": record.version.to_string(),
                        "payload": req.parameters.get("payload").cloned().unwrap_or_default(),
                    })),
                    other => Err(bad_request(format!("{} is not supported on functions", other))),
                }
            }
        }
    }

    fn bucket(&mut self, req: &Request) -> Outcome {
        let name = req.identifier.as_str();
        match req.action {
            Action::List => {
                let all = self
                    .buckets
                    .iter()
                    .map(|(name, b)| json!({ "name": name, "state": b.lifecycle.state }))
                    .collect();
                paginate(all, req)
            }
            Action::Create => {
                if self.buckets.contains_key(name) {
                    return Err(conflict(format!("bucket {}", name)));
                }
                self.buckets.insert(
                    name.to_string(),
                    BucketRecord {
                        lifecycle: Lifecycle::moving("creating", "available"),
                        objects: BTreeMap::new(),
                    },
                );
                Ok(json!({ "name": name, "location": req.region }))
            }
            Action::Describe => {
                let scripted = self.scripted(Category::Bucket, name);
                let bucket = self
                    .buckets
                    .get_mut(name)
                    .ok_or_else(|| not_found(format!("bucket {}", name)))?;
                let state = bucket.lifecycle.observe();
                Ok(json!({
                    "name": name,
                    "state": scripted.unwrap_or(state),
                    "location": req.region,
                    "objects": bucket.objects.len(),
                }))
            }
            Action::Delete => {
                let bucket = self
                    .buckets
                    .get(name)
                    .ok_or_else(|| not_found(format!("bucket {}", name)))?;
                if !bucket.objects.is_empty() {
                    return Err((409, format!("bucket {} is not empty", name)));
                }
                self.buckets.remove(name);
                Ok(json!({ "name": name }))
            }
            other => Err(bad_request(format!("{} is not supported on buckets", other))),
        }
    }

    fn object(&mut self, req: &Request) -> Outcome {
        let bucket_name = req
            .parent
            .clone()
            .ok_or_else(|| bad_request("object request without bucket"))?;
        let key = req.identifier.as_str();

        if req.action == Action::Copy {
            let source_bucket = required(req, "source_bucket")?;
            let source_key = required(req, "source_key")?;
            if source_bucket == bucket_name && source_key == key {
                return Err(bad_request(format!(
                    "object {}/{} cannot be copied onto itself",
                    bucket_name, key
                )));
            }
            let body = self
                .buckets
                .get(&source_bucket)
                .and_then(|b| b.objects.get(&source_key))
                .cloned()
                .ok_or_else(|| not_found(format!("object {}/{}", source_bucket, source_key)))?;
            let size = body.len();
            let destination = self
                .buckets
                .get_mut(&bucket_name)
                .ok_or_else(|| not_found(format!("bucket {}", bucket_name)))?;
            destination.objects.insert(key.to_string(), body);
            return Ok(json!({
                "bucket": bucket_name,
                "key": key,
                "size": size,
                "etag": etag(size),
            }));
        }

        let bucket = self
            .buckets
            .get_mut(&bucket_name)
            .ok_or_else(|| not_found(format!("bucket {}", bucket_name)))?;

        match req.action {
            Action::List => {
                let all = bucket
                    .objects
                    .iter()
                    .map(|(k, body)| json!({ "key": k, "size": body.len() }))
                    .collect();
                paginate(all, req)
            }
            Action::Upload => {
                let encoded = required(req, "body")?;
                let body = STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| bad_request(format!("body is not base64: {}", e)))?;
                let size = body.len();
                bucket.objects.insert(key.to_string(), body);
                Ok(json!({ "bucket": bucket_name, "key": key, "size": size, "etag": etag(size) }))
            }
            Action::Describe => {
                let body = bucket
                    .objects
                    .get(key)
                    .ok_or_else(|| not_found(format!("object {}/{}", bucket_name, key)))?;
                Ok(json!({
                    "bucket": bucket_name,
                    "key": key,
                    "size": body.len(),
                    "state": "available",
                }))
            }
            Action::Download => {
                let body = bucket
                    .objects
                    .get(key)
                    .ok_or_else(|| not_found(format!("object {}/{}", bucket_name, key)))?;
                Ok(json!({
                    "bucket": bucket_name,
                    "key": key,
                    "size": body.len(),
                    "body": STANDARD.encode(body),
                }))
            }
            Action::Delete => {
                bucket.objects.remove(key);
                Ok(json!({ "bucket": bucket_name, "key": key }))
            }
            other => Err(bad_request(format!("{} is not supported on objects", other))),
        }
    }
}

fn transition(lifecycle: &mut Lifecycle, via: &str, to: &str) -> Outcome {
    let previous = lifecycle.state.clone();
    *lifecycle = Lifecycle::moving(via, to);
    Ok(json!({ "previousState": previous, "currentState": via }))
}

fn instance_json(id: &str, record: &InstanceRecord, state: &str) -> Value {
    json!({
        "id": id,
        "state": state,
        "image": record.image,
        "type": record.instance_type,
        "tags": record.tags,
    })
}

fn function_json(name: &str, record: &FunctionRecord) -> Value {
    json!({
        "name": name,
        "state": "active",
        "version": record.version.to_string(),
        "codeSize": record.code.len(),
        "configuration": record.configuration,
    })
}

fn etag(size: usize) -> String {
    format!("\"{:016x}\"", size)
}

fn param_or(req: &Request, key: &str, default: &str) -> String {
    req.parameters
        .get(key)
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

fn required(req: &Request, key: &str) -> Result<String, (u16, String)> {
    req.parameters
        .get(key)
        .cloned()
        .ok_or_else(|| bad_request(format!("missing parameter: {}", key)))
}

fn paginate(all: Vec<Value>, req: &Request) -> Outcome {
    let page_size = match req.parameters.get(PAGE_SIZE_PARAM) {
        Some(raw) => raw
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| bad_request(format!("invalid page size: {}", raw)))?,
        None => DEFAULT_PAGE_SIZE,
    };
    let offset = match &req.continuation_token {
        Some(token) => token
            .strip_prefix(TOKEN_PREFIX)
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| bad_request("invalid continuation token"))?,
        None => 0,
    };

    let end = (offset + page_size).min(all.len());
    let results: Vec<Value> = all.get(offset..end).map(<[Value]>::to_vec).unwrap_or_default();
    let token = (end < all.len()).then(|| format!("{}{}", TOKEN_PREFIX, end));

    Ok(json!({ "results": results, "continuationToken": token }))
}
