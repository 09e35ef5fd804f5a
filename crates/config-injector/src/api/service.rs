use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Pod, PodSpec};
use tracing::{debug, warn};

use crate::api::admission_review::{AdmissionRequest, AdmissionResponse};
use crate::config::WebhookConfig;
use crate::injection::errors::InjectionError;
use crate::injection::patch::create_patch;
use crate::injection::spec::{injection_data, InjectionStatus};
use crate::injection::{inject_required, IGNORED_NAMESPACES};

/// Evaluates one admission request against the current webhook
/// configuration. Logical failures become deny responses carrying the
/// error message, the transport layer never sees them.
pub(crate) fn evaluate(config: &WebhookConfig, request: &AdmissionRequest) -> AdmissionResponse {
    match mutate(config, request) {
        Ok(Some(patch)) => AdmissionResponse::allow_with_patch(request.uid.clone(), &patch),
        Ok(None) => AdmissionResponse::allow(request.uid.clone()),
        Err(error) => {
            warn!(uid = %request.uid, %error, "admission request denied");
            AdmissionResponse::reject(request.uid.clone(), error.to_string())
        }
    }
}

fn mutate(
    config: &WebhookConfig,
    request: &AdmissionRequest,
) -> Result<Option<Vec<u8>>, InjectionError> {
    let object = request.object.as_ref().ok_or(InjectionError::MissingObject)?;
    let pod: Pod = serde_json::from_value(object.clone()).map_err(InjectionError::PodDecode)?;

    // pods created through a controller may not have their namespace set
    // on the object yet, the admission request always carries it
    let namespace = pod
        .metadata
        .namespace
        .as_deref()
        .or(request.namespace.as_deref())
        .unwrap_or_default();
    let name = pod
        .metadata
        .name
        .as_deref()
        .or(pod.metadata.generate_name.as_deref())
        .or(request.name.as_deref())
        .unwrap_or_default();

    let annotations = pod.metadata.annotations.clone().unwrap_or_default();
    let prefix = &config.annotation_prefix;
    let inject_key = format!("{prefix}inject");
    let status_key = format!("{prefix}status");

    if !inject_required(
        IGNORED_NAMESPACES,
        config.policy,
        namespace,
        name,
        &annotations,
        &inject_key,
        &status_key,
    ) {
        debug!(namespace, name, "injection not required");
        return Ok(None);
    }

    let empty_spec = PodSpec::default();
    let pod_spec = pod.spec.as_ref().unwrap_or(&empty_spec);

    let (spec, status_value) = injection_data(pod_spec, &annotations, config)?;
    let prev_status = InjectionStatus::from_annotations(&annotations, &status_key);
    let added_annotations = BTreeMap::from([(status_key, status_value)]);

    let patch = create_patch(&pod, &prev_status, &added_annotations, &spec)?;
    debug!(namespace, name, "patch computed");
    Ok(Some(patch))
}
