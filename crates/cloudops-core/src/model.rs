//! Resource references, action verbs and operation steps

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of remote resource a reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Instance,
    Function,
    Bucket,
    Object,
}

impl Category {
    /// Service whose client handles this category
    pub fn service(self) -> Service {
        match self {
            Category::Instance => Service::Compute,
            Category::Function => Service::Functions,
            Category::Bucket | Category::Object => Service::Storage,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Instance => write!(f, "instance"),
            Category::Function => write!(f, "function"),
            Category::Bucket => write!(f, "bucket"),
            Category::Object => write!(f, "object"),
        }
    }
}

/// Remote management API a client is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Compute,
    Functions,
    Storage,
}

impl Service {
    pub fn covers(self, category: Category) -> bool {
        category.service() == self
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Service::Compute => write!(f, "compute"),
            Service::Functions => write!(f, "functions"),
            Service::Storage => write!(f, "storage"),
        }
    }
}

/// Identifies one remote resource.
///
/// An object's parent is its bucket; other categories have no parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    category: Category,
    identifier: String,
    parent: Option<Box<ResourceRef>>,
}

impl ResourceRef {
    pub fn instance(id: impl Into<String>) -> Self {
        Self::root(Category::Instance, id)
    }

    pub fn function(name: impl Into<String>) -> Self {
        Self::root(Category::Function, name)
    }

    pub fn bucket(name: impl Into<String>) -> Self {
        Self::root(Category::Bucket, name)
    }

    pub fn object(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            category: Category::Object,
            identifier: key.into(),
            parent: Some(Box::new(Self::bucket(bucket))),
        }
    }

    /// Reference to the whole collection of a category (used by list requests)
    pub fn collection(category: Category, parent: Option<ResourceRef>) -> Self {
        Self {
            category,
            identifier: String::new(),
            parent: parent.map(Box::new),
        }
    }

    fn root(category: Category, identifier: impl Into<String>) -> Self {
        Self {
            category,
            identifier: identifier.into(),
            parent: None,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn parent(&self) -> Option<&ResourceRef> {
        self.parent.as_deref()
    }

    pub fn is_collection(&self) -> bool {
        self.identifier.is_empty()
    }

    /// Same category and parent, different identifier
    pub fn with_identifier(&self, identifier: impl Into<String>) -> Self {
        Self {
            category: self.category,
            identifier: identifier.into(),
            parent: self.parent.clone(),
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "{}/{}", parent.identifier, self.identifier),
            None if self.identifier.is_empty() => write!(f, "{}s", self.category),
            None => write!(f, "{}:{}", self.category, self.identifier),
        }
    }
}

/// Verb of a remote request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    List,
    Describe,
    Start,
    Stop,
    Reboot,
    Terminate,
    Update,
    UpdateCode,
    Invoke,
    Copy,
    Upload,
    Download,
    Delete,
    Tag,
}

impl Action {
    /// Whether repeating the action has no additional side effect
    pub fn is_idempotent(self) -> bool {
        matches!(
            self,
            Action::List | Action::Describe | Action::Delete | Action::Download
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::List => "list",
            Action::Describe => "describe",
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Reboot => "reboot",
            Action::Terminate => "terminate",
            Action::Update => "update",
            Action::UpdateCode => "update_code",
            Action::Invoke => "invoke",
            Action::Copy => "copy",
            Action::Upload => "upload",
            Action::Download => "download",
            Action::Delete => "delete",
            Action::Tag => "tag",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned step of a compound operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStep {
    action: Action,
    target: ResourceRef,
    parameters: BTreeMap<String, String>,
}

impl OperationStep {
    pub fn new(action: Action, target: ResourceRef) -> Self {
        Self {
            action,
            target,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn target(&self) -> &ResourceRef {
        &self.target
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

impl std::fmt::Display for OperationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action, self.target)
    }
}
