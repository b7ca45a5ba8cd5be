//! Strata HTTP API
//!
//! This crate provides the Axum-based HTTP surface of the proxy: the
//! interception fallback, the control endpoint, the relay endpoints and
//! the client event stream.

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, MetricsHandle};
