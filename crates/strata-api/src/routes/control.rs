//! Control channel endpoint

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use strata_core::WireMessage;
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// POST /__strata/control
///
/// Replies with the channel's answer, or `202 Accepted` with no body when
/// the message type is not understood.
async fn control(
    State(state): State<AppState>,
    Json(message): Json<WireMessage>,
) -> Result<Response, ApiError> {
    debug!("Control message {}", message.kind);

    match state.control.request(message).await? {
        Some(reply) => Ok(Json(reply).into_response()),
        None => Ok(StatusCode::ACCEPTED.into_response()),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/__strata/control", post(control))
}
