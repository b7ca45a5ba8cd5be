//! Strata Partition Store
//!
//! This crate provides the persistent, partitioned key-value store that
//! backs the interception proxy. Every partition holds cache entries keyed
//! by normalized request identity, kept in insertion order.

pub mod backend;
pub mod entry;
pub mod error;
pub mod memory;
pub mod sqlite;

pub use backend::{PartitionStore, StoreHandle};
pub use entry::{CacheEntry, EntryMeta, ResponseSnapshot};
pub use error::StorageError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
