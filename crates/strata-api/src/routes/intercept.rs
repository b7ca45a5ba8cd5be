//! Interception fallback
//!
//! Every request that is not a proxy endpoint is offered to the active
//! worker. Requests for another origin are refused with 421; the proxy
//! only ever contacts its configured origin.

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode, Uri},
    response::Response,
};
use strata_core::{Interception, Served};
use strata_origin::ResourceRequest;
use strata_storage::ResponseSnapshot;
use tracing::{debug, warn};
use url::Url;

use super::MAX_BODY_BYTES;
use crate::error::ApiError;
use crate::state::AppState;

const STRATEGY_HEADER: &str = "x-strata-strategy";
const SOURCE_HEADER: &str = "x-strata-source";

/// Fallback handler for all non-proxy routes
pub async fn intercept(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let url = resolve_url(state.registration.origin_url(), &parts.uri)?;
    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let request = ResourceRequest::new(parts.method, url)
        .with_headers(headers)
        .with_body(body);

    match state.registration.intercept(request).await? {
        Interception::Served(served) => Ok(served_response(served)),
        Interception::Declined(request) => {
            debug!("Refusing {} {} for another origin", request.method, request.url);
            Err(ApiError::Misdirected(format!(
                "{} is not served by this proxy",
                request.url
            )))
        }
    }
}

/// Absolute-form targets keep their own origin; origin-form paths are
/// resolved against the configured origin.
fn resolve_url(origin: &Url, uri: &Uri) -> Result<Url, ApiError> {
    let parsed = if uri.scheme().is_some() && uri.authority().is_some() {
        Url::parse(&uri.to_string())
    } else {
        let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        origin.join(target)
    };
    parsed.map_err(|e| ApiError::BadRequest(format!("invalid request target {}: {}", uri, e)))
}

fn served_response(served: Served) -> Response {
    let mut response = snapshot_response(served.response);
    let headers = response.headers_mut();
    headers.insert(
        STRATEGY_HEADER,
        HeaderValue::from_static(served.strategy.as_str()),
    );
    headers.insert(SOURCE_HEADER, HeaderValue::from_static(served.source.as_str()));
    response
}

fn snapshot_response(snapshot: ResponseSnapshot) -> Response {
    let mut response = Response::new(Body::from(snapshot.body));
    *response.status_mut() = StatusCode::from_u16(snapshot.status).unwrap_or_else(|_| {
        warn!("Origin answered with invalid status {}", snapshot.status);
        StatusCode::BAD_GATEWAY
    });

    let headers = response.headers_mut();
    for (name, value) in &snapshot.headers {
        // The body is buffered, so the framing header is recomputed
        if name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!("Dropping invalid header {}", name),
        }
    }
    response
}
