pub mod errors;
pub mod patch;
pub mod spec;

use std::collections::BTreeMap;

use tracing::info;

use crate::config::InjectionPolicy;

/// Cluster system namespaces that are never injected into, regardless of
/// policy or annotations.
pub const IGNORED_NAMESPACES: &[&str] = &["kube-system", "kube-public"];

/// Decides whether the init container must be injected into a pod.
///
/// The namespace ignore list wins over everything, then the per-pod
/// `<prefix>inject` annotation overrides the cluster-wide policy. The
/// annotation is interpreted with YAML 1.1 boolean tokens: `y`, `yes`,
/// `true` and `on` (case insensitive) opt in, any other non-empty value
/// opts out, absence falls back to the policy.
pub fn inject_required(
    ignored: &[&str],
    policy: InjectionPolicy,
    namespace: &str,
    name: &str,
    annotations: &BTreeMap<String, String>,
    inject_key: &str,
    status_key: &str,
) -> bool {
    if ignored.contains(&namespace) {
        return false;
    }

    let override_value = match annotations.get(inject_key).map(|v| v.to_lowercase()) {
        // http://yaml.org/type/bool.html
        Some(v) if matches!(v.as_str(), "y" | "yes" | "true" | "on") => Some(true),
        Some(v) if v.is_empty() => None,
        Some(_) => Some(false),
        None => None,
    };

    let required = match policy {
        InjectionPolicy::Enabled => override_value.unwrap_or(true),
        InjectionPolicy::Disabled => override_value.unwrap_or(false),
    };

    let status = annotations.get(status_key).cloned().unwrap_or_default();
    info!(
        namespace,
        name,
        policy = ?policy,
        override_value = ?override_value,
        status = %status,
        required,
        "injection policy evaluated"
    );

    required
}
