//! Background relay endpoints

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};
use strata_core::{Notification, PushPayload};

use crate::state::AppState;

#[derive(Deserialize)]
pub struct SyncRequest {
    pub tag: String,
}

#[derive(Deserialize)]
pub struct ClickRequest {
    pub action: String,
}

#[derive(Serialize)]
pub struct Delivered {
    /// Number of connected clients that received the message
    pub delivered: usize,
}

/// POST /__strata/sync
async fn sync(State(state): State<AppState>, Json(request): Json<SyncRequest>) -> Json<Delivered> {
    let delivered = state.registration.relay().sync(&request.tag);
    Json(Delivered { delivered })
}

/// POST /__strata/push
async fn push(
    State(state): State<AppState>,
    Json(payload): Json<PushPayload>,
) -> Json<Notification> {
    Json(state.registration.relay().push(payload))
}

/// POST /__strata/notification-click
async fn notification_click(
    State(state): State<AppState>,
    Json(request): Json<ClickRequest>,
) -> Response {
    match state.registration.relay().notification_click(&request.action) {
        Some(message) => Json(message).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/__strata/sync", post(sync))
        .route("/__strata/push", post(push))
        .route("/__strata/notification-click", post(notification_click))
}
