//! A single versioned proxy instance

use futures::future::join_all;
use http::Method;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use strata_origin::{Origin, ResourceRequest};
use strata_storage::{CacheEntry, StoreHandle};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::CoreError;
use crate::eviction::{EvictionManager, EvictionPolicy};
use crate::partition::PartitionNamer;
use crate::policy::{PolicyTable, ResourceRule};
use crate::strategy::{Served, StrategyEngine};

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// New, not yet installed
    Parsed,
    /// Populating the precache
    Installing,
    /// Precache complete, waiting to activate
    Installed,
    /// Purging partitions of other versions
    Activating,
    /// Serving intercepted requests
    Activated,
    /// Failed to install or replaced by a newer version
    Redundant,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        }
    }
}

/// Everything needed to build a worker for one version
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub app_prefix: String,
    pub version: String,
    /// Base URL of the origin; precache paths are resolved against it
    pub origin: Url,
    pub rules: Vec<ResourceRule>,
    /// Partition used by the network-first fallback rule
    pub default_partition: String,
    /// Paths or URLs stored in the static partition during install
    pub precache: Vec<String>,
    pub eviction_policy: EvictionPolicy,
}

/// Outcome of an on-demand precache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrecacheReport {
    pub cached: Vec<String>,
    pub failed: Vec<String>,
}

/// One version of the proxy
pub struct Worker {
    names: PartitionNamer,
    origin_url: Url,
    policy: PolicyTable,
    engine: StrategyEngine,
    store: StoreHandle,
    origin: Arc<dyn Origin>,
    precache: Vec<String>,
    state: RwLock<WorkerState>,
}

impl Worker {
    pub fn new(options: WorkerOptions, store: StoreHandle, origin: Arc<dyn Origin>) -> Self {
        let names = PartitionNamer::new(options.app_prefix, options.version);
        let eviction = EvictionManager::new(store.clone(), options.eviction_policy);
        let engine = StrategyEngine::new(store.clone(), origin.clone(), names.clone(), eviction);

        info!(
            "Created worker {} ({} rules, {} precached resources, eviction: {})",
            names.version(),
            options.rules.len(),
            options.precache.len(),
            options.eviction_policy.as_str()
        );

        Self {
            policy: PolicyTable::new(options.rules, &options.default_partition),
            names,
            origin_url: options.origin,
            engine,
            store,
            origin,
            precache: options.precache,
            state: RwLock::new(WorkerState::Parsed),
        }
    }

    pub fn version(&self) -> &str {
        self.names.version()
    }

    pub fn names(&self) -> &PartitionNamer {
        &self.names
    }

    pub fn policy(&self) -> &PolicyTable {
        &self.policy
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    fn set_state(&self, state: WorkerState) {
        debug!("Worker {} -> {}", self.version(), state.as_str());
        *self.state.write() = state;
    }

    /// Populate the precache. Any failure aborts the install and removes
    /// the entries this install already stored.
    pub async fn install(&self) -> Result<usize, CoreError> {
        self.set_state(WorkerState::Installing);
        info!("Installing version {}", self.version());

        let mut written = Vec::new();
        match self.populate_precache(&mut written).await {
            Ok(count) => {
                self.set_state(WorkerState::Installed);
                info!("Installed version {} ({} resources precached)", self.version(), count);
                Ok(count)
            }
            Err(reason) => {
                self.set_state(WorkerState::Redundant);
                self.engine.retire();
                self.discard_precache(&written).await;
                Err(CoreError::InstallationFailed {
                    version: self.version().to_string(),
                    reason,
                })
            }
        }
    }

    async fn populate_precache(&self, written: &mut Vec<String>) -> Result<usize, String> {
        let requests = self
            .precache
            .iter()
            .map(|resource| self.precache_request(resource).map_err(|e| format!("{resource}: {e}")))
            .collect::<Result<Vec<_>, _>>()?;

        let responses = join_all(requests.iter().map(|request| self.origin.fetch(request))).await;

        // Fetch everything before writing anything
        let mut entries = Vec::with_capacity(requests.len());
        for (request, response) in requests.iter().zip(responses) {
            let response = response.map_err(|e| format!("{}: {}", request.url, e))?;
            if !response.is_success() {
                return Err(format!("{}: status {}", request.url, response.status));
            }
            entries.push(CacheEntry::new(request.cache_key(), response));
        }

        let partition = self.names.static_partition();
        let count = entries.len();
        for entry in entries {
            let key = entry.key.clone();
            self.store
                .put(&partition, entry)
                .await
                .map_err(|e| format!("{key}: {e}"))?;
            written.push(key);
        }
        Ok(count)
    }

    /// Remove entries written by an aborted install, and the static
    /// partition itself if that leaves it empty
    async fn discard_precache(&self, written: &[String]) {
        if written.is_empty() {
            return;
        }
        let partition = self.names.static_partition();
        for key in written {
            if let Err(e) = self.store.delete(&partition, key).await {
                warn!("Failed to discard {} after aborted install of {}: {}", key, self.version(), e);
            }
        }
        match self.store.len(&partition).await {
            Ok(0) => {
                if let Err(e) = self.store.delete_partition(&partition).await {
                    warn!("Failed to delete empty partition {}: {}", partition, e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to inspect {} after aborted install: {}", partition, e),
        }
    }

    /// Delete every partition of this app that belongs to another version
    pub async fn activate(&self) -> Result<Vec<String>, CoreError> {
        self.set_state(WorkerState::Activating);

        let names = &self.names;
        let purged = self
            .store
            .delete_partitions_where(&|name: &str| names.is_stale(name))
            .await?;
        for name in &purged {
            info!("Deleted outdated partition {}", name);
        }

        self.set_state(WorkerState::Activated);
        Ok(purged)
    }

    /// Dispatch a request to the strategy selected by the policy table
    pub async fn handle(&self, request: &ResourceRequest) -> Result<Served, CoreError> {
        let rule = self.policy.find(request.path());
        debug!(
            "{} {} -> {} ({})",
            request.method,
            request.url,
            rule.strategy,
            rule.partition
        );
        self.engine.handle(request, rule).await
    }

    /// Fetch and store arbitrary resources into the static partition.
    /// Individual failures are reported, not fatal.
    pub async fn precache(&self, resources: &[String]) -> PrecacheReport {
        let partition = self.names.static_partition();
        let mut report = PrecacheReport::default();

        for resource in resources {
            let outcome = match self.precache_request(resource) {
                Ok(request) => match self.origin.fetch(&request).await {
                    Ok(response) if response.is_success() => self
                        .store
                        .put(&partition, CacheEntry::new(request.cache_key(), response))
                        .await
                        .map_err(|e| e.to_string()),
                    Ok(response) => Err(format!("status {}", response.status)),
                    Err(e) => Err(e.to_string()),
                },
                Err(e) => Err(e.to_string()),
            };

            match outcome {
                Ok(()) => report.cached.push(resource.clone()),
                Err(reason) => {
                    warn!("Failed to precache {}: {}", resource, reason);
                    report.failed.push(resource.clone());
                }
            }
        }

        info!(
            "Precached {} resources ({} failed)",
            report.cached.len(),
            report.failed.len()
        );
        report
    }

    /// Stop being eligible for new requests. In-flight requests complete
    /// but no longer write to the store.
    pub(crate) fn retire(&self) {
        self.engine.retire();
        if self.state() != WorkerState::Redundant {
            info!("Retiring version {}", self.version());
            self.set_state(WorkerState::Redundant);
        }
    }

    fn precache_request(&self, resource: &str) -> Result<ResourceRequest, url::ParseError> {
        let url = self.origin_url.join(resource)?;
        Ok(ResourceRequest::new(Method::GET, url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::StrategyKind;
    use crate::strategy::ResponseSource;
    use crate::testing::{ORIGIN, StubOrigin, get, memory_store};
    use strata_storage::{PartitionStore, ResponseSnapshot};

    fn options(version: &str, precache: &[&str]) -> WorkerOptions {
        WorkerOptions {
            app_prefix: "focus".to_string(),
            version: version.to_string(),
            origin: Url::parse(ORIGIN).unwrap(),
            rules: vec![
                ResourceRule::new("/offline.html", StrategyKind::CacheOnly, "static"),
                ResourceRule::new("/api/**", StrategyKind::NetworkFirst, "api"),
            ],
            default_partition: "dynamic".to_string(),
            precache: precache.iter().map(|p| p.to_string()).collect(),
            eviction_policy: EvictionPolicy::Fifo,
        }
    }

    #[tokio::test]
    async fn test_install_precaches_into_static_partition() {
        let (store, handle) = memory_store();
        let origin = StubOrigin::new();
        origin.serve("/", "<html>");
        origin.serve("/offline.html", "offline");

        let worker = Worker::new(options("v1", &["/", "/offline.html"]), handle, origin);
        assert_eq!(worker.install().await.unwrap(), 2);
        assert_eq!(worker.state(), WorkerState::Installed);
        assert_eq!(store.len("focus-v1-static").await.unwrap(), 2);

        // Precached entries are reachable through a cache-only rule
        let served = worker.handle(&get("/offline.html")).await.unwrap();
        assert_eq!(served.source, ResponseSource::Cache);
    }

    #[tokio::test]
    async fn test_install_aborts_on_any_failed_resource() {
        let (store, handle) = memory_store();
        let origin = StubOrigin::new();
        origin.serve("/", "<html>");
        // "/missing" answers 404

        let worker = Worker::new(options("v2", &["/", "/missing"]), handle, origin);
        let err = worker.install().await.unwrap_err();

        assert!(matches!(err, CoreError::InstallationFailed { ref version, .. } if version == "v2"));
        assert_eq!(worker.state(), WorkerState::Redundant);
        assert!(store.partitions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_install_keeps_existing_partitions_of_other_versions() {
        let (store, handle) = memory_store();
        store
            .put("focus-v1-static", CacheEntry::new("GET /", ResponseSnapshot::new(200, vec![], "v1")))
            .await
            .unwrap();
        let origin = StubOrigin::new();
        origin.set_offline(true);

        let worker = Worker::new(options("v2", &["/"]), handle, origin);
        assert!(worker.install().await.is_err());
        assert_eq!(store.partitions().await.unwrap(), vec!["focus-v1-static"]);
    }

    #[tokio::test]
    async fn test_failed_install_keeps_entries_it_did_not_write() {
        let store = Arc::new(strata_storage::MemoryStore::with_quota(8));
        let handle: StoreHandle = store.clone();
        store
            .put("focus-v2-static", CacheEntry::new("GET /kept", ResponseSnapshot::new(200, vec![], "kept")))
            .await
            .unwrap();
        let origin = StubOrigin::new();
        origin.serve("/", "ok");
        origin.serve("/huge", "does not fit in the quota");

        let worker = Worker::new(options("v2", &["/", "/huge"]), handle, origin);
        assert!(worker.install().await.is_err());

        let keys: Vec<String> = store
            .entries("focus-v2-static")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(keys, vec!["GET /kept"]);
    }

    #[tokio::test]
    async fn test_activate_purges_other_versions_only() {
        let (store, handle) = memory_store();
        for name in ["focus-v1-static", "focus-v1-api", "focus-v2-static", "other-v1-static"] {
            store
                .put(name, CacheEntry::new("GET /", ResponseSnapshot::new(200, vec![], "x")))
                .await
                .unwrap();
        }

        let worker = Worker::new(options("v2", &[]), handle, StubOrigin::new());
        let mut purged = worker.activate().await.unwrap();
        purged.sort();

        assert_eq!(purged, vec!["focus-v1-api", "focus-v1-static"]);
        assert_eq!(worker.state(), WorkerState::Activated);
        assert_eq!(
            store.partitions().await.unwrap(),
            vec!["focus-v2-static", "other-v1-static"]
        );
    }

    #[tokio::test]
    async fn test_on_demand_precache_reports_failures() {
        let (store, handle) = memory_store();
        let origin = StubOrigin::new();
        origin.serve("/sounds/bell.mp3", "ding");

        let worker = Worker::new(options("v1", &[]), handle, origin);
        let report = worker
            .precache(&["/sounds/bell.mp3".to_string(), "/sounds/gong.mp3".to_string()])
            .await;

        assert_eq!(report.cached, vec!["/sounds/bell.mp3"]);
        assert_eq!(report.failed, vec!["/sounds/gong.mp3"]);
        assert_eq!(store.len("focus-v1-static").await.unwrap(), 1);
    }
}
