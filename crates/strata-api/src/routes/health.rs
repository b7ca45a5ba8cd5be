//! Health check endpoints

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::state::AppState;

/// Health status response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Version of the proxy currently serving requests
    pub active_version: Option<String>,
    pub waiting_version: Option<String>,
    pub clients: usize,
}

/// Health check handler
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    metrics::counter!("strata_health_checks_total").increment(1);

    let registration = &state.registration;
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_version: registration.active().map(|w| w.version().to_string()),
        waiting_version: registration.waiting().map(|w| w.version().to_string()),
        clients: registration.client_count(),
    })
}

/// Create health routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
}
