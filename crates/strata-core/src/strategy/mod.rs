//! Strategy engine
//!
//! Five interchangeable request-handling algorithms behind one dispatcher.

mod engine;

use serde::Serialize;
use strata_storage::ResponseSnapshot;

use crate::policy::StrategyKind;

pub use engine::StrategyEngine;

/// Where the returned response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseSource {
    /// A cached entry within its freshness budget (or one this strategy never ages)
    Cache,
    /// A fresh network response
    Network,
    /// A cached entry served because the network failed
    Fallback,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Cache => "cache",
            ResponseSource::Network => "network",
            ResponseSource::Fallback => "fallback",
        }
    }
}

/// A response produced by the strategy engine
#[derive(Debug, Clone)]
pub struct Served {
    pub response: ResponseSnapshot,
    /// Strategy branch that produced the response
    pub strategy: StrategyKind,
    pub source: ResponseSource,
}

impl Served {
    fn new(response: ResponseSnapshot, strategy: StrategyKind, source: ResponseSource) -> Self {
        Self {
            response,
            strategy,
            source,
        }
    }
}
