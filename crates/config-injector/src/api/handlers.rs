use std::sync::Arc;

use axum::{
    extract::{self, FromRequest},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use tracing::{debug, error, Span};

use crate::api::{
    admission_review::{AdmissionRequest, AdmissionResponse, AdmissionReviewRequest, AdmissionReviewResponse},
    api_error::ApiError,
    service::evaluate,
    state::ApiServerState,
};
use crate::config::WebhookConfig;

// create an extractor that internally uses `axum::Json` but has a custom rejection
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub(crate) struct JsonExtractor<T>(T);

impl<T: Serialize> IntoResponse for JsonExtractor<T> {
    fn into_response(self) -> axum::response::Response {
        let Self(value) = self;
        axum::Json(value).into_response()
    }
}

#[tracing::instrument(
    name = "injection",
    fields(
        request_uid = tracing::field::Empty,
        name = tracing::field::Empty,
        namespace = tracing::field::Empty,
        operation = tracing::field::Empty,
        kind = tracing::field::Empty,
        allowed = tracing::field::Empty,
        mutated = tracing::field::Empty,
        response_message = tracing::field::Empty,
    ),
    skip_all)]
/// Mutate a pod admission request.
pub(crate) async fn inject_handler(
    extract::State(state): extract::State<Arc<ApiServerState>>,
    JsonExtractor(admission_review): JsonExtractor<AdmissionReviewRequest>,
) -> Json<AdmissionReviewResponse> {
    populate_span_with_admission_request_data(&admission_review.request);

    // snapshot taken once, a concurrent reload cannot change the
    // configuration halfway through this request
    let config = state.state.config();
    let response = evaluate(&config, &admission_review.request);

    populate_span_with_injection_results(&response);
    debug!(response = %serde_json::to_string(&response).unwrap_or_default());

    Json(AdmissionReviewResponse::new(response))
}

/// Reports whether the files on disk would survive a reload. A broken
/// configuration or certificate pair turns the probe unhealthy while the
/// server keeps serving with the last good state.
pub(crate) async fn health_handler(
    extract::State(state): extract::State<Arc<ApiServerState>>,
) -> (StatusCode, &'static str) {
    match check_files(&state) {
        Ok(()) => (StatusCode::OK, "UP"),
        Err(error) => {
            error!(%error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "DOWN")
        }
    }
}

fn check_files(state: &ApiServerState) -> anyhow::Result<()> {
    WebhookConfig::load(&state.config_file)?;
    crate::state::load_certified_key(&state.cert_file, &state.key_file)?;
    Ok(())
}

fn populate_span_with_admission_request_data(request: &AdmissionRequest) {
    Span::current().record("request_uid", request.uid.as_str());
    Span::current().record("name", request.name.clone().unwrap_or_default().as_str());
    Span::current().record(
        "namespace",
        request.namespace.clone().unwrap_or_default().as_str(),
    );
    Span::current().record("operation", request.operation.as_str());
    Span::current().record("kind", request.kind.kind.as_str());
}

fn populate_span_with_injection_results(response: &AdmissionResponse) {
    Span::current().record("allowed", response.allowed);
    Span::current().record("mutated", response.patch.is_some());
    if let Some(status) = &response.status {
        if let Some(message) = &status.message {
            Span::current().record("response_message", message.as_str());
        }
    }
}
