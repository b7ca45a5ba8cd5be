//! Resource rules and strategy kinds

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::matcher::PathPattern;

/// Error type for parsing a strategy name
#[derive(Debug, Clone)]
pub struct ParseStrategyError(String);

impl fmt::Display for ParseStrategyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid caching strategy: {}", self.0)
    }
}

impl std::error::Error for ParseStrategyError {}

/// How a matched request is served
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Serve from cache while fresh, refetch when expired, stale on error
    CacheFirst,
    /// Prefer the network, fall back to any cached copy when offline
    NetworkFirst,
    /// Serve cached copy immediately and refresh it in the background
    StaleWhileRevalidate,
    /// Always go to the network, never touch the cache
    NetworkOnly,
    /// Only ever answer from the cache
    CacheOnly,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::CacheFirst => "cache-first",
            StrategyKind::NetworkFirst => "network-first",
            StrategyKind::StaleWhileRevalidate => "stale-while-revalidate",
            StrategyKind::NetworkOnly => "network-only",
            StrategyKind::CacheOnly => "cache-only",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "cache-first" => Ok(StrategyKind::CacheFirst),
            "network-first" => Ok(StrategyKind::NetworkFirst),
            "stale-while-revalidate" => Ok(StrategyKind::StaleWhileRevalidate),
            "network-only" => Ok(StrategyKind::NetworkOnly),
            "cache-only" => Ok(StrategyKind::CacheOnly),
            _ => Err(ParseStrategyError(s.to_string())),
        }
    }
}

/// A pattern-to-strategy binding
#[derive(Debug, Clone)]
pub struct ResourceRule {
    pub pattern: PathPattern,
    pub strategy: StrategyKind,
    /// Logical partition name (unversioned)
    pub partition: String,
    pub max_age: Option<Duration>,
    pub max_entries: Option<usize>,
}

impl ResourceRule {
    pub fn new(pattern: &str, strategy: StrategyKind, partition: impl Into<String>) -> Self {
        Self {
            pattern: PathPattern::new(pattern),
            strategy,
            partition: partition.into(),
            max_age: None,
            max_entries: None,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_roundtrip() {
        for kind in [
            StrategyKind::CacheFirst,
            StrategyKind::NetworkFirst,
            StrategyKind::StaleWhileRevalidate,
            StrategyKind::NetworkOnly,
            StrategyKind::CacheOnly,
        ] {
            assert_eq!(kind.as_str().parse::<StrategyKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_strategy_parse_is_lenient_on_case_and_separator() {
        assert_eq!(
            "Stale_While_Revalidate".parse::<StrategyKind>().unwrap(),
            StrategyKind::StaleWhileRevalidate
        );
        assert!("cache-sometimes".parse::<StrategyKind>().is_err());
    }
}
