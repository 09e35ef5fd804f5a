use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Pod, PodSpec};
use serde::{Deserialize, Serialize};

use crate::injection::errors::InjectionError;
use crate::injection::spec::{InjectionSpec, InjectionStatus};

/// A single RFC 6902 operation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// Where new elements land in a list that already has entries.
#[derive(Clone, Copy)]
enum AddPosition {
    /// `add` at index 0, shifting existing entries down.
    Prepend,
    /// `add` at `/-`.
    Append,
}

/// Emits `remove` operations for every list entry whose name is in
/// `removed`. JSON Patch `remove` is applied sequentially, removing in
/// reverse index order keeps every computed index valid at application time.
fn remove_by_name<T>(
    items: &[T],
    removed: &[String],
    path: &str,
    name: impl Fn(&T) -> &str,
) -> Vec<PatchOperation> {
    let mut patch = Vec::new();
    for (i, item) in items.iter().enumerate().rev() {
        if removed.iter().any(|r| r == name(item)) {
            patch.push(PatchOperation {
                op: PatchOp::Remove,
                path: format!("{path}/{i}"),
                value: None,
            });
        }
    }
    patch
}

/// Emits `add` operations for new list entries. When the target list does
/// not exist yet the first operation creates it with a whole-array value,
/// appending to a missing list would be rejected by the API server.
fn add_to_list<T: Serialize>(
    existing: usize,
    added: &[T],
    base_path: &str,
    position: AddPosition,
) -> Result<Vec<PatchOperation>, InjectionError> {
    let mut patch = Vec::new();
    let mut first = existing == 0;
    for item in added {
        let value = serde_json::to_value(item).map_err(InjectionError::PatchEncode)?;
        let (path, value) = if first {
            first = false;
            (base_path.to_owned(), serde_json::Value::Array(vec![value]))
        } else {
            let suffix = match position {
                AddPosition::Prepend => "0",
                AddPosition::Append => "-",
            };
            (format!("{base_path}/{suffix}"), value)
        };
        patch.push(PatchOperation {
            op: PatchOp::Add,
            path,
            value: Some(value),
        });
    }
    Ok(patch)
}

fn update_annotations(
    target: Option<&BTreeMap<String, String>>,
    added: &BTreeMap<String, String>,
) -> Vec<PatchOperation> {
    let mut patch = Vec::new();
    for (key, value) in added {
        match target {
            None => patch.push(PatchOperation {
                op: PatchOp::Add,
                path: "/metadata/annotations".to_owned(),
                value: Some(serde_json::json!({ key: value })),
            }),
            Some(existing) => {
                let op = if existing.get(key).is_some_and(|v| !v.is_empty()) {
                    PatchOp::Replace
                } else {
                    PatchOp::Add
                };
                patch.push(PatchOperation {
                    op,
                    path: format!("/metadata/annotations/{}", escape_json_pointer(key)),
                    value: Some(serde_json::Value::String(value.clone())),
                });
            }
        }
    }
    patch
}

/// Escape a JSON Pointer key segment per RFC 6901: `~` before `/`, so that
/// the escape marker itself is never double-escaped.
fn escape_json_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Computes the full mutation for a pod as one ordered operation list:
/// removals of a previous injection first (reverse index order per list),
/// then the new init container, the volume mounts, the volume and finally
/// the status annotation.
pub fn create_patch(
    pod: &Pod,
    prev_status: &InjectionStatus,
    annotations: &BTreeMap<String, String>,
    spec: &InjectionSpec,
) -> Result<Vec<u8>, InjectionError> {
    let empty_spec = PodSpec::default();
    let pod_spec = pod.spec.as_ref().unwrap_or(&empty_spec);
    let init_containers = pod_spec.init_containers.as_deref().unwrap_or(&[]);
    let containers = &pod_spec.containers;
    let volumes = pod_spec.volumes.as_deref().unwrap_or(&[]);

    let mut patch = Vec::new();

    patch.extend(remove_by_name(
        init_containers,
        &prev_status.init_containers,
        "/spec/initContainers",
        |c| c.name.as_str(),
    ));
    for (i, container) in containers.iter().enumerate() {
        patch.extend(remove_by_name(
            container.volume_mounts.as_deref().unwrap_or(&[]),
            &prev_status.volume_mounts,
            &format!("/spec/containers/{i}/volumeMounts"),
            |m| m.name.as_str(),
        ));
    }
    patch.extend(remove_by_name(
        volumes,
        &prev_status.volumes,
        "/spec/volumes",
        |v| v.name.as_str(),
    ));

    patch.extend(add_to_list(
        init_containers.len(),
        &spec.init_containers,
        "/spec/initContainers",
        AddPosition::Prepend,
    )?);

    // the new init containers were prepended and the stale ones removed,
    // surviving pre-existing init containers sit after the new ones
    let mut position = spec.init_containers.len();
    for container in init_containers {
        if prev_status.init_containers.contains(&container.name) {
            continue;
        }
        patch.extend(add_to_list(
            container.volume_mounts.as_ref().map_or(0, Vec::len),
            &spec.volume_mounts,
            &format!("/spec/initContainers/{position}/volumeMounts"),
            AddPosition::Append,
        )?);
        position += 1;
    }
    for (i, container) in containers.iter().enumerate() {
        patch.extend(add_to_list(
            container.volume_mounts.as_ref().map_or(0, Vec::len),
            &spec.volume_mounts,
            &format!("/spec/containers/{i}/volumeMounts"),
            AddPosition::Append,
        )?);
    }
    patch.extend(add_to_list(
        volumes.len(),
        &spec.volumes,
        "/spec/volumes",
        AddPosition::Append,
    )?);

    patch.extend(update_annotations(
        pod.metadata.annotations.as_ref(),
        annotations,
    ));

    serde_json::to_vec(&patch).map_err(InjectionError::PatchEncode)
}
