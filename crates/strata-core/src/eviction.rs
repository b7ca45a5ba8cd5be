//! Per-partition entry budget enforcement

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strata_storage::StoreHandle;
use tracing::{debug, info};

use crate::error::CoreError;

/// Error type for parsing eviction policy
#[derive(Debug, Clone)]
pub struct ParseEvictionPolicyError(String);

impl fmt::Display for ParseEvictionPolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid eviction policy: {}", self.0)
    }
}

impl std::error::Error for ParseEvictionPolicyError {}

/// Order in which entries leave a partition that is over budget
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// First In First Out - evict the oldest writes first
    #[default]
    Fifo,
    /// Least Recently Used - evict entries that haven't been served recently
    Lru,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::Fifo => "fifo",
            EvictionPolicy::Lru => "lru",
        }
    }
}

impl FromStr for EvictionPolicy {
    type Err = ParseEvictionPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fifo" => Ok(EvictionPolicy::Fifo),
            "lru" => Ok(EvictionPolicy::Lru),
            _ => Err(ParseEvictionPolicyError(s.to_string())),
        }
    }
}

/// Deletes entries from partitions that exceed their `max_entries` budget
#[derive(Clone)]
pub struct EvictionManager {
    store: StoreHandle,
    policy: EvictionPolicy,
}

impl EvictionManager {
    pub fn new(store: StoreHandle, policy: EvictionPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Trim `partition` down to `max_entries`, returning how many entries were deleted
    pub async fn enforce_limit(&self, partition: &str, max_entries: usize) -> Result<usize, CoreError> {
        let mut entries = self.store.entries(partition).await?;
        if entries.len() <= max_entries {
            return Ok(0);
        }

        if self.policy == EvictionPolicy::Lru {
            // Stable sort: ties keep insertion order
            entries.sort_by_key(|meta| meta.last_accessed_at);
        }

        let excess = entries.len() - max_entries;
        let mut evicted = 0;
        for meta in entries.into_iter().take(excess) {
            debug!("Evicting {} from {}", meta.key, partition);
            // A concurrent writer may already have removed it
            if self.store.delete(partition, &meta.key).await? {
                evicted += 1;
            }
        }

        metrics::counter!("strata_evictions_total", "partition" => partition.to_string())
            .increment(evicted as u64);
        info!(
            "Evicted {} entries from {} (limit {}, policy {})",
            evicted,
            partition,
            max_entries,
            self.policy.as_str()
        );
        Ok(evicted)
    }
}
