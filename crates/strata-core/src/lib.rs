//! Strata Core
//!
//! This crate provides the decision-making half of the interception proxy:
//! the resource policy table, the five caching strategies, eviction,
//! the install/activate lifecycle, the runtime control channel and the
//! background notification relay.

pub mod config;
pub mod control;
pub mod error;
pub mod eviction;
pub mod lifecycle;
pub mod partition;
pub mod policy;
pub mod relay;
pub mod strategy;

#[cfg(test)]
pub(crate) mod testing;

pub use config::RuleConfig;
pub use control::{
    CacheStats, ControlChannel, ControlCommand, ControlMessage, PartitionStats, WireMessage,
};
pub use error::CoreError;
pub use eviction::{EvictionManager, EvictionPolicy};
pub use lifecycle::{
    ClientHandle, Interception, PrecacheReport, Registration, Worker, WorkerOptions, WorkerState,
};
pub use partition::PartitionNamer;
pub use policy::{PolicyTable, ResourceRule, StrategyKind};
pub use relay::{ClientMessage, Notification, NotificationAction, NotificationRelay, PushPayload};
pub use strategy::{ResponseSource, Served, StrategyEngine};
