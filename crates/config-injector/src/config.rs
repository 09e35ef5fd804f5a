use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};

use anyhow::{anyhow, Result};
use clap::ArgMatches;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

pub static SERVICE_NAME: &str = "config-injector";

/// Process-level configuration, built from the command line.
pub struct Config {
    pub addr: SocketAddr,
    pub config_file: PathBuf,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub health_check_interval: Option<Duration>,
    pub health_check_file: Option<PathBuf>,
    pub log_level: String,
    pub log_fmt: String,
    pub log_no_color: bool,
}

impl Config {
    pub fn from_args(matches: &ArgMatches) -> Result<Self> {
        let addr = api_bind_address(matches)?;

        let config_file = matches
            .get_one::<String>("config-file")
            .map(PathBuf::from)
            .expect("This should not happen, there's a default value for config-file");
        let cert_file = matches
            .get_one::<String>("cert-file")
            .map(PathBuf::from)
            .expect("This should not happen, there's a default value for cert-file");
        let key_file = matches
            .get_one::<String>("key-file")
            .map(PathBuf::from)
            .expect("This should not happen, there's a default value for key-file");

        let health_check_interval = matches
            .get_one::<String>("health-check-interval")
            .expect("This should not happen, there's a default value for health-check-interval")
            .parse::<u64>()
            .map_err(|e| anyhow!("error parsing health-check-interval: {}", e))
            .map(|secs| {
                if secs == 0 {
                    None
                } else {
                    Some(Duration::from_secs(secs))
                }
            })?;
        let health_check_file = matches
            .get_one::<String>("health-check-file")
            .map(PathBuf::from);

        let log_level = matches
            .get_one::<String>("log-level")
            .expect("This should not happen, there's a default value for log-level")
            .to_owned();
        let log_fmt = matches
            .get_one::<String>("log-fmt")
            .expect("This should not happen, there's a default value for log-fmt")
            .to_owned();
        let log_no_color = matches
            .get_one::<bool>("log-no-color")
            .expect("clap should have assigned a default value")
            .to_owned();

        Ok(Self {
            addr,
            config_file,
            cert_file,
            key_file,
            health_check_interval,
            health_check_file,
            log_level,
            log_fmt,
            log_no_color,
        })
    }
}

fn api_bind_address(matches: &clap::ArgMatches) -> Result<SocketAddr> {
    format!(
        "{}:{}",
        matches.get_one::<String>("address").unwrap(),
        matches.get_one::<String>("port").unwrap()
    )
    .parse()
    .map_err(|e| anyhow!("error parsing arguments: {}", e))
}

/// Whether the init container is injected by default into pods of the
/// watched namespaces. Individual pods can opt in or out with the
/// `<prefix>inject` annotation.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InjectionPolicy {
    #[serde(rename = "enabled")]
    #[default]
    Enabled,
    #[serde(rename = "disabled")]
    Disabled,
}

/// The webhook policy file. Every field is optional in the YAML document;
/// unset fields are filled with the documented defaults while parsing, so
/// the rest of the code never has to deal with partially-set configuration.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct WebhookConfig {
    #[serde(default = "default_annotation_prefix")]
    pub annotation_prefix: String,
    #[serde(default)]
    pub policy: InjectionPolicy,
    #[serde(default = "default_container_image")]
    pub container_image: String,
    #[serde(default)]
    pub default: WebhookConfigDefaults,
    #[serde(default)]
    pub resources: InitContainerResources,
    #[serde(default)]
    pub security_context: SecurityContextConfig,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct WebhookConfigDefaults {
    #[serde(default = "default_container_name")]
    pub container_name: String,
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_volume_name")]
    pub volume_name: String,
    #[serde(default = "default_volume_mount")]
    pub volume_mount: String,
    #[serde(default = "default_source")]
    pub source: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InitContainerResources {
    #[serde(default = "default_resource_requests")]
    pub requests: InitContainerResourcesList,
    #[serde(default = "default_resource_limits")]
    pub limits: InitContainerResourcesList,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InitContainerResourcesList {
    pub cpu: String,
    pub memory: String,
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct SecurityContextConfig {
    #[serde(default)]
    pub allow_privilege_escalation: bool,
}

fn default_annotation_prefix() -> String {
    "config.injector.dev/".to_owned()
}

fn default_container_image() -> String {
    "ghcr.io/config-injector/fetch".to_owned()
}

fn default_container_name() -> String {
    "config-init".to_owned()
}

fn default_label() -> String {
    "master".to_owned()
}

fn default_profile() -> String {
    "default".to_owned()
}

fn default_volume_name() -> String {
    "config-volume".to_owned()
}

fn default_volume_mount() -> String {
    "/config".to_owned()
}

fn default_source() -> String {
    "http://config-service.default.svc:8080".to_owned()
}

fn default_resource_requests() -> InitContainerResourcesList {
    InitContainerResourcesList {
        cpu: "100m".to_owned(),
        memory: "10M".to_owned(),
    }
}

fn default_resource_limits() -> InitContainerResourcesList {
    InitContainerResourcesList {
        cpu: "100m".to_owned(),
        memory: "50M".to_owned(),
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        WebhookConfig {
            annotation_prefix: default_annotation_prefix(),
            policy: InjectionPolicy::default(),
            container_image: default_container_image(),
            default: WebhookConfigDefaults::default(),
            resources: InitContainerResources::default(),
            security_context: SecurityContextConfig::default(),
        }
    }
}

impl Default for WebhookConfigDefaults {
    fn default() -> Self {
        WebhookConfigDefaults {
            container_name: default_container_name(),
            label: default_label(),
            profile: default_profile(),
            volume_name: default_volume_name(),
            volume_mount: default_volume_mount(),
            source: default_source(),
        }
    }
}

impl Default for InitContainerResources {
    fn default() -> Self {
        InitContainerResources {
            requests: default_resource_requests(),
            limits: default_resource_limits(),
        }
    }
}

impl WebhookConfig {
    /// Reads and parses the webhook policy file.
    pub fn load(path: &Path) -> Result<WebhookConfig> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("cannot read configuration file {}: {}", path.display(), e))?;
        Self::from_yaml(&data)
            .map_err(|e| anyhow!("cannot parse configuration file {}: {}", path.display(), e))
    }

    pub fn from_yaml(data: &str) -> Result<WebhookConfig> {
        // an empty document deserializes as YAML null, not as a mapping
        if data.trim().is_empty() {
            return Ok(WebhookConfig::default());
        }
        let config: WebhookConfig = serde_yaml::from_str(data)?;

        debug!(
            digest = %format!("{:x}", Sha256::digest(data.as_bytes())),
            "configuration loaded"
        );

        Ok(config)
    }
}
