//! Lifecycle controller
//!
//! A [`Worker`] is one version of the proxy: it installs (precache), then
//! activates (purges partitions of other versions) and serves requests until
//! a newer worker replaces it. The [`Registration`] owns the active and
//! waiting workers and routes intercepted requests to the active one.

mod registration;
mod worker;

pub use registration::{ClientHandle, Interception, Registration};
pub use worker::{PrecacheReport, Worker, WorkerOptions, WorkerState};
