//! Partition store trait

use async_trait::async_trait;
use std::sync::Arc;

use crate::entry::{CacheEntry, EntryMeta};
use crate::error::StorageError;

/// Shared handle passed to every component that reads or writes the cache
pub type StoreHandle = Arc<dyn PartitionStore>;

/// Partition store trait
///
/// A partition is a named bucket of entries. Within a partition a key
/// appears at most once; writing an existing key replaces it and moves it
/// to the tail of the insertion order. Implementations must tolerate
/// concurrent reads and writes to the same key (last write wins).
#[async_trait]
pub trait PartitionStore: Send + Sync {
    /// List every partition currently present
    async fn partitions(&self) -> Result<Vec<String>, StorageError>;

    /// Read an entry
    async fn get(&self, partition: &str, key: &str) -> Result<Option<CacheEntry>, StorageError>;

    /// Write an entry, creating the partition if needed
    async fn put(&self, partition: &str, entry: CacheEntry) -> Result<(), StorageError>;

    /// Delete an entry
    async fn delete(&self, partition: &str, key: &str) -> Result<bool, StorageError>;

    /// Entry metadata in insertion order, oldest first
    async fn entries(&self, partition: &str) -> Result<Vec<EntryMeta>, StorageError>;

    /// Record an access to an entry
    async fn touch(&self, partition: &str, key: &str) -> Result<(), StorageError>;

    /// Number of entries in a partition (zero when absent)
    async fn len(&self, partition: &str) -> Result<usize, StorageError>;

    /// Delete a whole partition with all of its entries
    async fn delete_partition(&self, partition: &str) -> Result<bool, StorageError>;

    /// Delete every partition whose name satisfies `predicate`, returning the deleted names
    async fn delete_partitions_where(
        &self,
        predicate: &(dyn for<'p> Fn(&'p str) -> bool + Send + Sync),
    ) -> Result<Vec<String>, StorageError> {
        let mut removed = Vec::new();
        for name in self.partitions().await? {
            if predicate(&name) && self.delete_partition(&name).await? {
                removed.push(name);
            }
        }
        Ok(removed)
    }
}
