//! Declarative rule configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::policy::{ResourceRule, StrategyKind};

/// One `[[rules]]` entry as written in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Glob pattern over the request path
    pub pattern: String,
    pub strategy: StrategyKind,
    /// Logical partition name; versioning is applied at runtime
    pub partition: String,
    /// Freshness budget in seconds (cache-first only)
    #[serde(default)]
    pub max_age_secs: Option<u64>,
    /// Entry budget for the partition, enforced after every write
    #[serde(default)]
    pub max_entries: Option<usize>,
}

impl RuleConfig {
    pub fn to_rule(&self) -> ResourceRule {
        let mut rule = ResourceRule::new(&self.pattern, self.strategy, self.partition.clone());
        rule.max_age = self.max_age_secs.map(Duration::from_secs);
        rule.max_entries = self.max_entries;
        rule
    }
}
