//! Active/waiting worker bookkeeping and request interception

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strata_origin::ResourceRequest;
use strata_storage::StoreHandle;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::worker::{PrecacheReport, Worker};
use crate::control::{CacheStats, PartitionStats};
use crate::error::CoreError;
use crate::partition::belongs_to_prefix;
use crate::relay::{ClientMessage, NotificationRelay};
use crate::strategy::Served;

/// Result of offering a request to the proxy
#[derive(Debug)]
pub enum Interception {
    /// The active worker produced a response
    Served(Served),
    /// Cross-origin request; the proxy does not handle it
    Declined(ResourceRequest),
}

/// Owns the active and waiting workers of one application
pub struct Registration {
    prefix: String,
    origin_url: Url,
    store: StoreHandle,
    relay: NotificationRelay,
    active: watch::Sender<Option<Arc<Worker>>>,
    waiting: Mutex<Option<Arc<Worker>>>,
    skip_waiting: AtomicBool,
    clients: Mutex<HashSet<Uuid>>,
}

impl Registration {
    pub fn new(
        prefix: impl Into<String>,
        origin_url: Url,
        store: StoreHandle,
        relay: NotificationRelay,
    ) -> Arc<Self> {
        let (active, _) = watch::channel(None);
        Arc::new(Self {
            prefix: prefix.into(),
            origin_url,
            store,
            relay,
            active,
            waiting: Mutex::new(None),
            skip_waiting: AtomicBool::new(false),
            clients: Mutex::new(HashSet::new()),
        })
    }

    pub fn origin_url(&self) -> &Url {
        &self.origin_url
    }

    pub fn relay(&self) -> &NotificationRelay {
        &self.relay
    }

    pub fn active(&self) -> Option<Arc<Worker>> {
        self.active.borrow().clone()
    }

    pub fn waiting(&self) -> Option<Arc<Worker>> {
        self.waiting.lock().clone()
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Install a new version. It becomes active right away when nothing is
    /// active yet, no client is connected, or waiting was skipped; otherwise
    /// it waits for the last client to disconnect.
    pub async fn install(&self, worker: Arc<Worker>) -> Result<(), CoreError> {
        if let Some(active) = self.active()
            && active.version() == worker.version()
        {
            info!("Version {} is already active", worker.version());
            return Ok(());
        }
        if let Some(waiting) = self.waiting()
            && waiting.version() == worker.version()
        {
            info!("Version {} is already installed and waiting", worker.version());
            return Ok(());
        }

        worker.install().await?;

        let replaced = self.waiting.lock().replace(worker.clone());
        if let Some(previous) = replaced {
            previous.retire();
        }

        let skip = self.skip_waiting.swap(false, Ordering::SeqCst);
        let clients = self.client_count();
        if skip || clients == 0 || self.active().is_none() {
            self.activate_waiting().await?;
        } else {
            info!(
                "Version {} installed, waiting for {} connected clients",
                worker.version(),
                clients
            );
        }
        Ok(())
    }

    /// Activate the waiting version immediately, or as soon as one is
    /// installed. Returns whether a version was activated now.
    pub async fn skip_waiting(&self) -> Result<bool, CoreError> {
        self.skip_waiting.store(true, Ordering::SeqCst);
        let activated = self.activate_waiting().await?;
        if activated {
            self.skip_waiting.store(false, Ordering::SeqCst);
        }
        Ok(activated)
    }

    async fn activate_waiting(&self) -> Result<bool, CoreError> {
        let Some(worker) = self.waiting.lock().take() else {
            return Ok(false);
        };

        let purged = match worker.activate().await {
            Ok(purged) => purged,
            Err(e) => {
                worker.retire();
                return Err(e);
            }
        };

        let previous = self.active.send_replace(Some(worker.clone()));
        if let Some(previous) = previous {
            previous.retire();
        }

        let version = worker.version().to_string();
        let claimed = self.relay.broadcast(ClientMessage::ControllerChanged {
            version: version.clone(),
        });
        info!(
            "Version {} active ({} outdated partitions purged, {} clients claimed)",
            version,
            purged.len(),
            claimed
        );
        Ok(true)
    }

    /// Route a request through the active worker, waiting for activation
    /// if no version is active yet.
    pub async fn intercept(&self, request: ResourceRequest) -> Result<Interception, CoreError> {
        if !request.is_same_origin(&self.origin_url) {
            debug!("Declining cross-origin request {}", request.url);
            return Ok(Interception::Declined(request));
        }

        let worker = self.ready().await?;
        Ok(Interception::Served(worker.handle(&request).await?))
    }

    /// Resolve once a version is active
    pub async fn ready(&self) -> Result<Arc<Worker>, CoreError> {
        let mut rx = self.active.subscribe();
        rx.wait_for(Option::is_some)
            .await
            .map_err(|_| CoreError::ChannelClosed)?
            .clone()
            .ok_or(CoreError::ChannelClosed)
    }

    /// Register a connected client; dropping the handle disconnects it
    pub fn connect_client(self: &Arc<Self>) -> ClientHandle {
        let id = Uuid::new_v4();
        let count = {
            let mut clients = self.clients.lock();
            clients.insert(id);
            clients.len()
        };
        debug!("Client {} connected ({} total)", id, count);
        ClientHandle {
            id,
            registration: self.clone(),
        }
    }

    fn release_client(&self, id: Uuid) -> usize {
        let mut clients = self.clients.lock();
        clients.remove(&id);
        clients.len()
    }

    /// Entry counts for every partition of this application
    pub async fn cache_stats(&self) -> Result<CacheStats, CoreError> {
        let mut partitions = Vec::new();
        for name in self.store.partitions().await? {
            if !belongs_to_prefix(&self.prefix, &name) {
                continue;
            }
            let entries = self.store.len(&name).await?;
            partitions.push(PartitionStats { name, entries });
        }
        let total = partitions.iter().map(|p| p.entries).sum();
        Ok(CacheStats { partitions, total })
    }

    /// Delete one partition (logical or storage name), or every partition
    /// of this application. Returns the storage names removed.
    pub async fn clear_cache(&self, partition: Option<&str>) -> Result<Vec<String>, CoreError> {
        match partition {
            Some(name) => {
                let storage_name = match self.active() {
                    Some(worker) => worker.names().resolve(name),
                    None => name.to_string(),
                };
                if self.store.delete_partition(&storage_name).await? {
                    info!("Cleared partition {}", storage_name);
                    Ok(vec![storage_name])
                } else {
                    debug!("Partition {} does not exist", storage_name);
                    Ok(Vec::new())
                }
            }
            None => {
                let prefix = self.prefix.as_str();
                let cleared = self
                    .store
                    .delete_partitions_where(&|name: &str| belongs_to_prefix(prefix, name))
                    .await?;
                info!("Cleared {} partitions", cleared.len());
                Ok(cleared)
            }
        }
    }

    /// Precache through the active version
    pub async fn precache(&self, resources: &[String]) -> Result<PrecacheReport, CoreError> {
        let worker = self
            .active()
            .ok_or_else(|| CoreError::InvalidState("no active version".to_string()))?;
        Ok(worker.precache(resources).await)
    }
}

/// A connected client. Dropping the last handle activates a waiting version.
pub struct ClientHandle {
    id: Uuid,
    registration: Arc<Registration>,
}

impl ClientHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        let remaining = self.registration.release_client(self.id);
        debug!("Client {} disconnected ({} remaining)", self.id, remaining);

        if remaining > 0 || self.registration.waiting().is_none() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let registration = self.registration.clone();
        runtime.spawn(async move {
            if let Err(e) = registration.activate_waiting().await {
                warn!("Failed to activate waiting version: {}", e);
            }
        });
    }
}
