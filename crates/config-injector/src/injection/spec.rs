use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, PodSpec, ResourceRequirements, SecurityContext, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{InitContainerResourcesList, WebhookConfig};
use crate::injection::errors::InjectionError;

/// Record of what a previous admission of the same pod added. Stored as a
/// JSON string inside the `<prefix>status` annotation and read back to
/// remove the stale objects before re-injecting.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InjectionStatus {
    pub init_containers: Vec<String>,
    pub volume_mounts: Vec<String>,
    pub volumes: Vec<String>,
}

impl InjectionStatus {
    /// Extracts the injection status from the pod annotations. A status with
    /// all three lists empty counts as "no prior injection".
    pub fn from_annotations(
        annotations: &BTreeMap<String, String>,
        status_key: &str,
    ) -> InjectionStatus {
        if let Some(value) = annotations.get(status_key) {
            if let Ok(status) = serde_json::from_str::<InjectionStatus>(value) {
                if !status.init_containers.is_empty()
                    || !status.volume_mounts.is_empty()
                    || !status.volumes.is_empty()
                {
                    return status;
                }
            }
        }
        InjectionStatus::default()
    }
}

/// The concrete objects a single admission adds to a pod.
#[derive(Debug, Clone)]
pub struct InjectionSpec {
    pub init_containers: Vec<Container>,
    pub volume_mounts: Vec<VolumeMount>,
    pub volumes: Vec<Volume>,
}

/// Annotation values overlaid over the configuration defaults.
struct DynamicConfig {
    container_name: String,
    volume_name: String,
    volume_mount: String,
    image_args: Vec<String>,
}

fn lookup<'a>(
    annotations: &'a BTreeMap<String, String>,
    prefix: &str,
    key: &str,
) -> Option<&'a str> {
    annotations.get(&format!("{prefix}{key}")).map(String::as_str)
}

fn calculate_image_args(
    config: &WebhookConfig,
    annotations: &BTreeMap<String, String>,
    pod_spec: &PodSpec,
) -> Result<Vec<String>, InjectionError> {
    let prefix = &config.annotation_prefix;
    let mapping = lookup(annotations, prefix, "mapping");
    let destination = lookup(annotations, prefix, "destination");

    let (mode, extra) = match (mapping, destination) {
        (Some(mapping), None) => ("files", vec!["--files".to_owned(), mapping.to_owned()]),
        (None, Some(destination)) => (
            "values",
            vec!["--destination".to_owned(), destination.to_owned()],
        ),
        (None, None) => {
            return Err(InjectionError::MissingModeAnnotation {
                mapping: format!("{prefix}mapping"),
                destination: format!("{prefix}destination"),
            })
        }
        (Some(_), Some(_)) => {
            return Err(InjectionError::ConflictingModeAnnotations {
                mapping: format!("{prefix}mapping"),
                destination: format!("{prefix}destination"),
            })
        }
    };

    let source = lookup(annotations, prefix, "source").unwrap_or(&config.default.source);
    let profile = lookup(annotations, prefix, "profile").unwrap_or(&config.default.profile);
    let label = lookup(annotations, prefix, "label").unwrap_or(&config.default.label);
    let application = match lookup(annotations, prefix, "application") {
        Some(application) => application.to_owned(),
        None => {
            let application = pod_spec
                .containers
                .first()
                .map(|c| c.name.clone())
                .unwrap_or_default();
            debug!(application, "defaulting application name");
            application
        }
    };

    let mut args = vec![
        "get".to_owned(),
        mode.to_owned(),
        "--source".to_owned(),
        source.to_owned(),
        "--application".to_owned(),
        application,
        "--profile".to_owned(),
        profile.to_owned(),
        "--label".to_owned(),
        label.to_owned(),
    ];
    args.extend(extra);
    Ok(args)
}

fn calculate_dynamic_config(
    config: &WebhookConfig,
    annotations: &BTreeMap<String, String>,
    pod_spec: &PodSpec,
) -> Result<DynamicConfig, InjectionError> {
    let prefix = &config.annotation_prefix;

    Ok(DynamicConfig {
        container_name: lookup(annotations, prefix, "container-name")
            .unwrap_or(&config.default.container_name)
            .to_owned(),
        volume_name: lookup(annotations, prefix, "volume-name")
            .unwrap_or(&config.default.volume_name)
            .to_owned(),
        volume_mount: lookup(annotations, prefix, "volume-mount")
            .unwrap_or(&config.default.volume_mount)
            .to_owned(),
        image_args: calculate_image_args(config, annotations, pod_spec)?,
    })
}

fn resource_list(list: &InitContainerResourcesList) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_owned(), Quantity(list.cpu.clone())),
        ("memory".to_owned(), Quantity(list.memory.clone())),
    ])
}

/// Resolves annotations and defaults into the init container, shared volume
/// and volume mount to add, plus the serialized status annotation value.
pub fn injection_data(
    pod_spec: &PodSpec,
    annotations: &BTreeMap<String, String>,
    config: &WebhookConfig,
) -> Result<(InjectionSpec, String), InjectionError> {
    let dynamic = calculate_dynamic_config(config, annotations, pod_spec)?;

    let volume_mount = VolumeMount {
        name: dynamic.volume_name.clone(),
        mount_path: dynamic.volume_mount.clone(),
        ..Default::default()
    };

    let spec = InjectionSpec {
        init_containers: vec![Container {
            name: dynamic.container_name.clone(),
            image: Some(config.container_image.clone()),
            args: Some(dynamic.image_args),
            volume_mounts: Some(vec![volume_mount.clone()]),
            resources: Some(ResourceRequirements {
                requests: Some(resource_list(&config.resources.requests)),
                limits: Some(resource_list(&config.resources.limits)),
                ..Default::default()
            }),
            security_context: Some(SecurityContext {
                allow_privilege_escalation: Some(
                    config.security_context.allow_privilege_escalation,
                ),
                ..Default::default()
            }),
            ..Default::default()
        }],
        volume_mounts: vec![volume_mount.clone()],
        volumes: vec![Volume {
            name: volume_mount.name,
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        }],
    };

    let status = InjectionStatus {
        init_containers: spec.init_containers.iter().map(|c| c.name.clone()).collect(),
        volume_mounts: spec.volume_mounts.iter().map(|m| m.name.clone()).collect(),
        volumes: spec.volumes.iter().map(|v| v.name.clone()).collect(),
    };
    let status_value = serde_json::to_string(&status).map_err(InjectionError::StatusEncode)?;

    Ok((spec, status_value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_spec_with_containers(names: &[&str]) -> PodSpec {
        PodSpec {
            containers: names
                .iter()
                .map(|name| Container {
                    name: (*name).to_owned(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn annotations(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (format!("config.injector.dev/{k}"), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn destination_annotation_selects_values_mode() {
        let config = WebhookConfig::default();
        let pod_spec = pod_spec_with_containers(&["app"]);
        let (spec, status) = injection_data(
            &pod_spec,
            &annotations(&[("destination", "config.yaml")]),
            &config,
        )
        .unwrap();

        let init = &spec.init_containers[0];
        assert_eq!(init.name, "config-init");
        assert_eq!(
            init.args.as_ref().unwrap(),
            &[
                "get",
                "values",
                "--source",
                "http://config-service.default.svc:8080",
                "--application",
                "app",
                "--profile",
                "default",
                "--label",
                "master",
                "--destination",
                "config.yaml",
            ]
        );
        assert_eq!(
            status,
            r#"{"initContainers":["config-init"],"volumeMounts":["config-volume"],"volumes":["config-volume"]}"#
        );
    }

    #[test]
    fn mapping_annotation_selects_files_mode() {
        let config = WebhookConfig::default();
        let pod_spec = pod_spec_with_containers(&["app"]);
        let (spec, _) = injection_data(
            &pod_spec,
            &annotations(&[("mapping", "app.yaml:/config/app.yaml")]),
            &config,
        )
        .unwrap();

        let args = spec.init_containers[0].args.as_ref().unwrap();
        assert_eq!(args[1], "files");
        assert_eq!(&args[args.len() - 2..], &["--files", "app.yaml:/config/app.yaml"]);
    }

    #[test]
    fn missing_mode_annotation_is_an_error() {
        let config = WebhookConfig::default();
        let pod_spec = pod_spec_with_containers(&["app"]);
        let err = injection_data(&pod_spec, &annotations(&[]), &config).unwrap_err();
        assert!(matches!(err, InjectionError::MissingModeAnnotation { .. }));
        assert!(err
            .to_string()
            .contains("'config.injector.dev/mapping' or 'config.injector.dev/destination'"));
    }

    #[test]
    fn both_mode_annotations_are_an_error() {
        let config = WebhookConfig::default();
        let pod_spec = pod_spec_with_containers(&["app"]);
        let err = injection_data(
            &pod_spec,
            &annotations(&[("mapping", "a"), ("destination", "b")]),
            &config,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            InjectionError::ConflictingModeAnnotations { .. }
        ));
    }

    #[test]
    fn annotations_override_defaults() {
        let config = WebhookConfig::default();
        let pod_spec = pod_spec_with_containers(&["app"]);
        let (spec, status) = injection_data(
            &pod_spec,
            &annotations(&[
                ("destination", "out.yaml"),
                ("container-name", "custom-init"),
                ("volume-name", "custom-volume"),
                ("volume-mount", "/custom"),
                ("source", "http://other.svc:8080"),
                ("profile", "prod"),
                ("label", "v2"),
                ("application", "billing"),
            ]),
            &config,
        )
        .unwrap();

        let init = &spec.init_containers[0];
        assert_eq!(init.name, "custom-init");
        let args = init.args.as_ref().unwrap();
        assert_eq!(
            args,
            &[
                "get",
                "values",
                "--source",
                "http://other.svc:8080",
                "--application",
                "billing",
                "--profile",
                "prod",
                "--label",
                "v2",
                "--destination",
                "out.yaml",
            ]
        );
        assert_eq!(spec.volumes[0].name, "custom-volume");
        assert_eq!(spec.volume_mounts[0].mount_path, "/custom");
        assert!(status.contains("custom-init"));
        assert!(status.contains("custom-volume"));
    }

    #[test]
    fn application_defaults_to_first_container() {
        let config = WebhookConfig::default();
        let pod_spec = pod_spec_with_containers(&["first", "second"]);
        let (spec, _) = injection_data(
            &pod_spec,
            &annotations(&[("destination", "c.yaml")]),
            &config,
        )
        .unwrap();
        let args = spec.init_containers[0].args.as_ref().unwrap();
        let pos = args.iter().position(|a| a == "--application").unwrap();
        assert_eq!(args[pos + 1], "first");
    }

    #[test]
    fn init_container_carries_resources_and_security_context() {
        let config = WebhookConfig::default();
        let pod_spec = pod_spec_with_containers(&["app"]);
        let (spec, _) = injection_data(
            &pod_spec,
            &annotations(&[("destination", "c.yaml")]),
            &config,
        )
        .unwrap();

        let init = &spec.init_containers[0];
        let resources = init.resources.as_ref().unwrap();
        assert_eq!(
            resources.requests.as_ref().unwrap()["cpu"],
            Quantity("100m".to_owned())
        );
        assert_eq!(
            resources.limits.as_ref().unwrap()["memory"],
            Quantity("50M".to_owned())
        );
        assert_eq!(
            init.security_context
                .as_ref()
                .unwrap()
                .allow_privilege_escalation,
            Some(false)
        );
        assert_eq!(init.volume_mounts.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn status_roundtrip_from_annotations() {
        let mut map = BTreeMap::new();
        map.insert(
            "config.injector.dev/status".to_owned(),
            r#"{"initContainers":["config-init"],"volumeMounts":["config-volume"],"volumes":["config-volume"]}"#.to_owned(),
        );
        let status = InjectionStatus::from_annotations(&map, "config.injector.dev/status");
        assert_eq!(status.init_containers, vec!["config-init"]);
        assert_eq!(status.volumes, vec!["config-volume"]);
    }

    #[test]
    fn empty_status_counts_as_no_prior_injection() {
        let mut map = BTreeMap::new();
        map.insert(
            "config.injector.dev/status".to_owned(),
            r#"{"initContainers":[],"volumeMounts":[],"volumes":[]}"#.to_owned(),
        );
        let status = InjectionStatus::from_annotations(&map, "config.injector.dev/status");
        assert_eq!(status, InjectionStatus::default());
    }

    #[test]
    fn garbage_status_counts_as_no_prior_injection() {
        let mut map = BTreeMap::new();
        map.insert(
            "config.injector.dev/status".to_owned(),
            "not json".to_owned(),
        );
        let status = InjectionStatus::from_annotations(&map, "config.injector.dev/status");
        assert_eq!(status, InjectionStatus::default());
    }
}
