//! Step lists for the multi-step user actions
//!
//! Each builder returns the ordered [`OperationStep`]s for one user-level
//! action, ready for [`Coordinator::run`](crate::coordinator::Coordinator::run).

use crate::coordinator::WAIT_PARAM;
use crate::error::{CoreError, Result};
use crate::model::{Action, Category, OperationStep, ResourceRef};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::BTreeMap;

fn copy_step(
    src_bucket: &str,
    src_key: &str,
    dst_bucket: &str,
    dst_key: &str,
) -> Result<OperationStep> {
    if src_bucket == dst_bucket && src_key == dst_key {
        return Err(CoreError::SameSourceAndDestination(format!("{}/{}", src_bucket, src_key)));
    }
    let step = OperationStep::new(Action::Copy, ResourceRef::object(dst_bucket, dst_key))
        .with_param("source_bucket", src_bucket)
        .with_param("source_key", src_key);
    Ok(step)
}

/// Copy to the destination, then delete the source.
///
/// If the delete fails the copy stays in place and both objects exist.
/// Moving an object onto itself is rejected: the delete would remove the
/// only copy.
pub fn move_object(
    src_bucket: &str,
    src_key: &str,
    dst_bucket: &str,
    dst_key: &str,
) -> Result<Vec<OperationStep>> {
    Ok(vec![
        copy_step(src_bucket, src_key, dst_bucket, dst_key)?,
        OperationStep::new(Action::Delete, ResourceRef::object(src_bucket, src_key)),
    ])
}

pub fn copy_object(
    src_bucket: &str,
    src_key: &str,
    dst_bucket: &str,
    dst_key: &str,
) -> Result<Vec<OperationStep>> {
    Ok(vec![copy_step(src_bucket, src_key, dst_bucket, dst_key)?])
}

pub fn upload_object(bucket: &str, key: &str, body: &[u8]) -> Vec<OperationStep> {
    vec![
        OperationStep::new(Action::Upload, ResourceRef::object(bucket, key))
            .with_param("body", STANDARD.encode(body)),
    ]
}

pub fn delete_object(bucket: &str, key: &str) -> Vec<OperationStep> {
    vec![OperationStep::new(Action::Delete, ResourceRef::object(bucket, key))]
}

/// Create a bucket; the coordinator waits until it is `available`
pub fn create_bucket(name: &str) -> Vec<OperationStep> {
    vec![OperationStep::new(Action::Create, ResourceRef::bucket(name))]
}

pub fn delete_bucket(name: &str) -> Vec<OperationStep> {
    vec![OperationStep::new(Action::Delete, ResourceRef::bucket(name))]
}

/// Launch an instance and tag it with its name
pub fn create_instance(
    image: &str,
    instance_type: &str,
    name: &str,
    wait: bool,
) -> Vec<OperationStep> {
    let mut create =
        OperationStep::new(Action::Create, ResourceRef::collection(Category::Instance, None))
            .with_param("image", image)
            .with_param("type", instance_type);
    if wait {
        create = create.with_param(WAIT_PARAM, "true");
    }

    // the tag step targets the instance created by the first step
    let tag = OperationStep::new(Action::Tag, ResourceRef::collection(Category::Instance, None))
        .with_param("key", "Name")
        .with_param("value", name);

    vec![create, tag]
}

/// Start, stop, reboot or terminate one instance
pub fn instance_action(action: Action, id: &str, wait: bool) -> Vec<OperationStep> {
    let mut step = OperationStep::new(action, ResourceRef::instance(id));
    if wait {
        step = step.with_param(WAIT_PARAM, "true");
    }
    vec![step]
}

pub fn create_function(
    name: &str,
    configuration: &BTreeMap<String, String>,
    code: &str,
) -> Vec<OperationStep> {
    let step = configuration.iter().fold(
        OperationStep::new(Action::Create, ResourceRef::function(name)),
        |step, (k, v)| step.with_param(k, v),
    );
    vec![step.with_param("code", code)]
}

/// Update configuration, then code; either part may be omitted
pub fn update_function(
    name: &str,
    configuration: &BTreeMap<String, String>,
    code: Option<&str>,
) -> Vec<OperationStep> {
    let mut steps = Vec::new();
    if !configuration.is_empty() {
        steps.push(configuration.iter().fold(
            OperationStep::new(Action::Update, ResourceRef::function(name)),
            |step, (k, v)| step.with_param(k, v),
        ));
    }
    if let Some(code) = code {
        steps.push(
            OperationStep::new(Action::UpdateCode, ResourceRef::function(name))
                .with_param("code", code),
        );
    }
    steps
}

pub fn invoke_function(name: &str, payload: Option<&str>) -> Vec<OperationStep> {
    let step = OperationStep::new(Action::Invoke, ResourceRef::function(name));
    vec![match payload {
        Some(payload) => step.with_param("payload", payload),
        None => step,
    }]
}

pub fn delete_function(name: &str) -> Vec<OperationStep> {
    vec![OperationStep::new(Action::Delete, ResourceRef::function(name))]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_is_copy_then_delete() {
        let steps = move_object("a", "k1", "b", "k2").unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].action(), Action::Copy);
        assert_eq!(steps[0].target(), &ResourceRef::object("b", "k2"));
        assert_eq!(steps[0].param("source_bucket"), Some("a"));
        assert_eq!(steps[0].param("source_key"), Some("k1"));
        assert_eq!(steps[1].action(), Action::Delete);
        assert_eq!(steps[1].target(), &ResourceRef::object("a", "k1"));
    }

    #[test]
    fn test_move_onto_itself_rejected() {
        let err = move_object("a", "k", "a", "k").unwrap_err();
        assert!(matches!(err, CoreError::SameSourceAndDestination(ref at) if at == "a/k"));
        assert!(copy_object("a", "k", "a", "k").is_err());

        // same key in another bucket, or another key in the same bucket, is fine
        assert!(move_object("a", "k", "b", "k").is_ok());
        assert!(move_object("a", "k", "a", "k2").is_ok());
    }

    #[test]
    fn test_update_function_skips_empty_parts() {
        let mut config = BTreeMap::new();
        assert!(update_function("f", &config, None).is_empty());

        config.insert("memory".to_string(), "256".to_string());
        let steps = update_function("f", &config, Some("print(1)"));
        let actions: Vec<_> = steps.iter().map(|s| s.action()).collect();
        assert_eq!(actions, vec![Action::Update, Action::UpdateCode]);
        assert_eq!(steps[0].param("memory"), Some("256"));
    }

    #[test]
    fn test_upload_encodes_body() {
        let steps = upload_object("b", "k", b"hello");
        assert_eq!(steps[0].param("body"), Some("aGVsbG8="));
    }

    #[test]
    fn test_instance_wait_flag() {
        let steps = instance_action(Action::Start, "i-1", true);
        assert_eq!(steps[0].param(WAIT_PARAM), Some("true"));
        let steps = create_instance("img", "small", "web", false);
        assert_eq!(steps[0].param(WAIT_PARAM), None);
        assert_eq!(steps[1].param("value"), Some("web"));
    }
}
