//! Strata Origin Access
//!
//! This crate provides the network side of the interception proxy: the
//! request model, the `Origin` trait the strategy engine fetches through,
//! and a reqwest-backed implementation talking to the real origin.

pub mod client;
pub mod error;
pub mod request;

pub use client::{HttpOrigin, HttpOriginConfig, Origin};
pub use error::NetworkError;
pub use request::ResourceRequest;
