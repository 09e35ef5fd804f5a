use std::sync::Arc;

use axum::Router;
use tempfile::TempDir;

use config_injector::api::{app, state::ApiServerState};
use config_injector::config::WebhookConfig;
use config_injector::state::{parse_certified_key, SharedState};

pub(crate) struct TestApp {
    pub(crate) app: Router,
    // owns the backing files, dropping it invalidates the health check
    pub(crate) dir: TempDir,
}

pub(crate) fn test_app() -> TestApp {
    test_app_with_config("")
}

pub(crate) fn test_app_with_config(config_yaml: &str) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config_file = dir.path().join("config.yaml");
    let cert_file = dir.path().join("tls.crt");
    let key_file = dir.path().join("tls.key");

    std::fs::write(&config_file, config_yaml).unwrap();

    let key_pair = rcgen::KeyPair::generate().unwrap();
    let cert = rcgen::CertificateParams::new(vec!["localhost".to_owned()])
        .unwrap()
        .self_signed(&key_pair)
        .unwrap();
    std::fs::write(&cert_file, cert.pem()).unwrap();
    std::fs::write(&key_file, key_pair.serialize_pem()).unwrap();

    let config = WebhookConfig::from_yaml(config_yaml).unwrap();
    let certified_key = parse_certified_key(
        cert.pem().as_bytes(),
        key_pair.serialize_pem().as_bytes(),
    )
    .unwrap();
    let state = SharedState::new(config, certified_key);

    let api_state = Arc::new(ApiServerState {
        state,
        config_file,
        cert_file,
        key_file,
    });

    TestApp {
        app: app(api_state),
        dir,
    }
}

pub(crate) fn admission_review_body(pod: serde_json::Value) -> String {
    serde_json::json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
            "kind": {"group": "", "version": "v1", "kind": "Pod"},
            "name": "test-pod",
            "namespace": "default",
            "operation": "CREATE",
            "object": pod,
        },
    })
    .to_string()
}

pub(crate) fn pod(namespace: &str, annotations: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": "test-pod",
            "namespace": namespace,
            "annotations": annotations,
        },
        "spec": {
            "containers": [{"name": "app", "image": "example/app:1.0"}],
        },
    })
}
