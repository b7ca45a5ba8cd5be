//! Strategy implementations and dispatch

use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strata_origin::{Origin, ResourceRequest};
use strata_storage::{CacheEntry, ResponseSnapshot, StoreHandle};
use tracing::{debug, warn};

use super::{ResponseSource, Served};
use crate::error::CoreError;
use crate::eviction::EvictionManager;
use crate::partition::PartitionNamer;
use crate::policy::{ResourceRule, StrategyKind};

/// Executes strategies against the partition store and the origin
///
/// Cloning is cheap; stale-while-revalidate moves a clone into the
/// background task that refreshes the cache. Clones share the retired
/// flag, so a refresh still running after its version was replaced
/// does not write.
#[derive(Clone)]
pub struct StrategyEngine {
    store: StoreHandle,
    origin: Arc<dyn Origin>,
    names: PartitionNamer,
    eviction: EvictionManager,
    retired: Arc<AtomicBool>,
}

impl StrategyEngine {
    pub fn new(
        store: StoreHandle,
        origin: Arc<dyn Origin>,
        names: PartitionNamer,
        eviction: EvictionManager,
    ) -> Self {
        Self {
            store,
            origin,
            names,
            eviction,
            retired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop persisting responses. Requests still complete from the network.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Serve `request` according to `rule`
    pub async fn handle(&self, request: &ResourceRequest, rule: &ResourceRule) -> Result<Served, CoreError> {
        // Only GET responses are ever cached; everything else passes through
        let strategy = if request.is_cacheable() {
            rule.strategy
        } else {
            StrategyKind::NetworkOnly
        };

        let result = match strategy {
            StrategyKind::CacheFirst => self.cache_first(request, rule).await,
            StrategyKind::NetworkFirst => self.network_first(request, rule).await,
            StrategyKind::StaleWhileRevalidate => self.stale_while_revalidate(request, rule).await,
            StrategyKind::NetworkOnly => self.network_only(request, rule).await,
            StrategyKind::CacheOnly => self.cache_only(request, rule).await,
        };

        match &result {
            Ok(served) => {
                metrics::counter!(
                    "strata_requests_total",
                    "strategy" => served.strategy.as_str(),
                    "source" => served.source.as_str()
                )
                .increment(1);
            }
            Err(e) => debug!("{} {} failed under {}: {}", request.method, request.url, strategy, e),
        }
        result
    }

    async fn cache_first(&self, request: &ResourceRequest, rule: &ResourceRule) -> Result<Served, CoreError> {
        let kind = StrategyKind::CacheFirst;
        let partition = self.names.storage_name(&rule.partition);
        let key = request.cache_key();

        let Some(entry) = self.lookup(&partition, &key).await else {
            let response = self.fetch(request).await?;
            self.write(&partition, rule, &key, &response).await;
            return Ok(Served::new(response, kind, ResponseSource::Network));
        };

        if is_fresh(&entry, rule) {
            return Ok(Served::new(entry.payload, kind, ResponseSource::Cache));
        }

        debug!("Cached {} expired, refetching", key);
        match self.fetch(request).await {
            Ok(response) => {
                self.write(&partition, rule, &key, &response).await;
                Ok(Served::new(response, kind, ResponseSource::Network))
            }
            Err(e) => {
                warn!("Refetch of {} failed, serving stale copy: {}", key, e);
                Ok(Served::new(entry.payload, kind, ResponseSource::Fallback))
            }
        }
    }

    async fn network_first(&self, request: &ResourceRequest, rule: &ResourceRule) -> Result<Served, CoreError> {
        let kind = StrategyKind::NetworkFirst;
        let partition = self.names.storage_name(&rule.partition);
        let key = request.cache_key();

        match self.fetch(request).await {
            Ok(response) => {
                self.write(&partition, rule, &key, &response).await;
                Ok(Served::new(response, kind, ResponseSource::Network))
            }
            Err(e) => match self.lookup(&partition, &key).await {
                Some(entry) => {
                    warn!(
                        "Network failed for {}, serving cached copy ({}s old): {}",
                        key,
                        entry.age(Utc::now()).as_secs(),
                        e
                    );
                    Ok(Served::new(entry.payload, kind, ResponseSource::Fallback))
                }
                None => Err(e),
            },
        }
    }

    async fn stale_while_revalidate(
        &self,
        request: &ResourceRequest,
        rule: &ResourceRule,
    ) -> Result<Served, CoreError> {
        let kind = StrategyKind::StaleWhileRevalidate;
        let partition = self.names.storage_name(&rule.partition);
        let key = request.cache_key();

        let cached = self.lookup(&partition, &key).await;

        // The refresh runs on its own task so that it outlives a caller that
        // already got the cached copy. Concurrent refreshes of one key may
        // both write; the last one wins.
        let engine = self.clone();
        let background_request = request.clone();
        let background_rule = rule.clone();
        let had_cached_copy = cached.is_some();
        let refresh = tokio::spawn(async move {
            let result = engine.fetch(&background_request).await;
            match &result {
                Ok(response) => {
                    engine.write(&partition, &background_rule, &key, response).await;
                }
                Err(e) if had_cached_copy => {
                    warn!("Background revalidation of {} failed: {}", key, e);
                }
                Err(_) => {}
            }
            result
        });

        match cached {
            Some(entry) => Ok(Served::new(entry.payload, kind, ResponseSource::Cache)),
            None => {
                let response = refresh.await??;
                Ok(Served::new(response, kind, ResponseSource::Network))
            }
        }
    }

    async fn network_only(&self, request: &ResourceRequest, _rule: &ResourceRule) -> Result<Served, CoreError> {
        let response = self.fetch(request).await?;
        Ok(Served::new(response, StrategyKind::NetworkOnly, ResponseSource::Network))
    }

    async fn cache_only(&self, request: &ResourceRequest, rule: &ResourceRule) -> Result<Served, CoreError> {
        let partition = self.names.storage_name(&rule.partition);
        let key = request.cache_key();

        match self.lookup(&partition, &key).await {
            Some(entry) => Ok(Served::new(entry.payload, StrategyKind::CacheOnly, ResponseSource::Cache)),
            None => Err(CoreError::NotFound(key)),
        }
    }

    async fn fetch(&self, request: &ResourceRequest) -> Result<ResponseSnapshot, CoreError> {
        self.origin.fetch(request).await.map_err(|e| {
            metrics::counter!("strata_network_failures_total").increment(1);
            CoreError::from(e)
        })
    }

    /// Read an entry; storage failures degrade to a miss
    async fn lookup(&self, partition: &str, key: &str) -> Option<CacheEntry> {
        match self.store.get(partition, key).await {
            Ok(Some(entry)) => {
                if let Err(e) = self.store.touch(partition, key).await {
                    debug!("Failed to record access to {}: {}", key, e);
                }
                Some(entry)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Cache read of {} in {} failed, treating as miss: {}", key, partition, e);
                None
            }
        }
    }

    /// Persist a network response; failures are logged and the write dropped
    async fn write(&self, partition: &str, rule: &ResourceRule, key: &str, response: &ResponseSnapshot) {
        if !response.is_success() {
            debug!("Not caching {}: status {}", key, response.status);
            return;
        }
        if response.is_no_store() {
            debug!("Not caching {}: no-store", key);
            return;
        }
        // Checked last so that a version retired mid-request cannot
        // recreate a partition the successor already purged
        if self.is_retired() {
            debug!("Not caching {}: version {} retired", key, self.names.version());
            return;
        }

        let entry = CacheEntry::new(key, response.clone());
        if let Err(e) = self.store.put(partition, entry).await {
            metrics::counter!("strata_dropped_writes_total").increment(1);
            if e.is_quota_exceeded() {
                warn!("Storage quota exceeded, response for {} not persisted: {}", key, e);
            } else {
                warn!("Failed to persist {} in {}: {}", key, partition, e);
            }
            return;
        }

        if let Some(max_entries) = rule.max_entries
            && let Err(e) = self.eviction.enforce_limit(partition, max_entries).await
        {
            warn!("Eviction in {} failed: {}", partition, e);
        }
    }
}

/// Fresh when within the rule's max-age, or the origin's `max-age` when the rule has none
fn is_fresh(entry: &CacheEntry, rule: &ResourceRule) -> bool {
    match rule.max_age.or_else(|| entry.payload.max_age()) {
        Some(budget) => entry.age(Utc::now()) <= budget,
        None => true,
    }
}
