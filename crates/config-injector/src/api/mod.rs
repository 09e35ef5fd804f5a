pub mod admission_review;
pub(crate) mod api_error;
pub(crate) mod handlers;
pub(crate) mod service;
pub mod state;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::api::handlers::{health_handler, inject_handler};
use crate::api::state::ApiServerState;

pub fn app(state: Arc<ApiServerState>) -> Router {
    Router::new()
        .route("/inject", post(inject_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
