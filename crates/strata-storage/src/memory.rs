//! In-memory partition store

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::backend::PartitionStore;
use crate::entry::{CacheEntry, EntryMeta};
use crate::error::StorageError;

#[derive(Default)]
struct Partition {
    /// key -> (insertion sequence, entry)
    entries: HashMap<String, (u64, CacheEntry)>,
    /// insertion sequence -> key
    order: BTreeMap<u64, String>,
}

#[derive(Default)]
struct Inner {
    partitions: HashMap<String, Partition>,
    next_seq: u64,
    used_bytes: u64,
}

/// In-memory partition store
///
/// Entries are kept in a per-partition map plus an ordered index of
/// insertion sequence numbers, so FIFO traversal never needs a sort.
/// An optional byte quota emulates platform storage limits.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    quota_bytes: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes once `quota_bytes` would be exceeded
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Total bytes currently held
    pub fn used_bytes(&self) -> u64 {
        self.inner.read().used_bytes
    }
}

#[async_trait]
impl PartitionStore for MemoryStore {
    async fn partitions(&self) -> Result<Vec<String>, StorageError> {
        let mut names: Vec<String> = self.inner.read().partitions.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn get(&self, partition: &str, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        Ok(self
            .inner
            .read()
            .partitions
            .get(partition)
            .and_then(|p| p.entries.get(key))
            .map(|(_, entry)| entry.clone()))
    }

    async fn put(&self, partition: &str, entry: CacheEntry) -> Result<(), StorageError> {
        let mut inner = self.inner.write();

        let replaced = inner
            .partitions
            .get(partition)
            .and_then(|p| p.entries.get(&entry.key))
            .map(|(_, e)| e.size)
            .unwrap_or(0);
        let projected = inner.used_bytes - replaced + entry.size;

        if let Some(quota) = self.quota_bytes
            && projected > quota
        {
            return Err(StorageError::QuotaExceeded {
                required: entry.size,
                available: quota.saturating_sub(inner.used_bytes - replaced),
            });
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.used_bytes = projected;

        debug!("Storing {} in partition {} (seq {})", entry.key, partition, seq);

        let slot = inner.partitions.entry(partition.to_string()).or_default();
        if let Some((old_seq, _)) = slot.entries.remove(&entry.key) {
            slot.order.remove(&old_seq);
        }
        slot.order.insert(seq, entry.key.clone());
        slot.entries.insert(entry.key.clone(), (seq, entry));
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &str) -> Result<bool, StorageError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let Some(slot) = inner.partitions.get_mut(partition) else {
            return Ok(false);
        };
        match slot.entries.remove(key) {
            Some((seq, entry)) => {
                slot.order.remove(&seq);
                inner.used_bytes -= entry.size;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn entries(&self, partition: &str) -> Result<Vec<EntryMeta>, StorageError> {
        let inner = self.inner.read();
        let Some(slot) = inner.partitions.get(partition) else {
            return Ok(Vec::new());
        };
        Ok(slot
            .order
            .values()
            .filter_map(|key| slot.entries.get(key))
            .map(|(_, entry)| entry.meta())
            .collect())
    }

    async fn touch(&self, partition: &str, key: &str) -> Result<(), StorageError> {
        if let Some((_, entry)) = self
            .inner
            .write()
            .partitions
            .get_mut(partition)
            .and_then(|p| p.entries.get_mut(key))
        {
            entry.last_accessed_at = Utc::now();
        }
        Ok(())
    }

    async fn len(&self, partition: &str) -> Result<usize, StorageError> {
        Ok(self
            .inner
            .read()
            .partitions
            .get(partition)
            .map(|p| p.entries.len())
            .unwrap_or(0))
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool, StorageError> {
        let mut inner = self.inner.write();
        match inner.partitions.remove(partition) {
            Some(slot) => {
                let freed: u64 = slot.entries.values().map(|(_, e)| e.size).sum();
                inner.used_bytes -= freed;
                debug!("Deleted partition {} ({} bytes)", partition, freed);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
