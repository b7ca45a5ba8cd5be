//! Test doubles shared by the unit tests of this crate

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use strata_origin::{NetworkError, Origin, ResourceRequest};
use strata_storage::{MemoryStore, PartitionStore, ResponseSnapshot, StoreHandle};
use tokio::sync::Semaphore;

pub const ORIGIN: &str = "http://app.test";

/// Scripted origin: answers from a path table, can go offline and can hold
/// responses behind a gate until the test releases them.
#[derive(Default)]
pub struct StubOrigin {
    routes: Mutex<HashMap<String, ResponseSnapshot>>,
    offline: AtomicBool,
    gate: Mutex<Option<Arc<Semaphore>>>,
    calls: AtomicUsize,
}

impl StubOrigin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, path: &str, body: &str) {
        self.serve_response(path, ResponseSnapshot::new(200, vec![], body.to_string()));
    }

    pub fn serve_response(&self, path: &str, response: ResponseSnapshot) {
        self.routes.lock().insert(path.to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Hold every fetch until the returned semaphore gets a permit
    pub fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Origin for StubOrigin {
    async fn fetch(&self, request: &ResourceRequest) -> Result<ResponseSnapshot, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| NetworkError::Unreachable(e.to_string()))?;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::Unreachable(request.url.to_string()));
        }

        Ok(self
            .routes
            .lock()
            .get(request.path())
            .cloned()
            .unwrap_or_else(|| ResponseSnapshot::new(404, vec![], "not found")))
    }
}

pub fn memory_store() -> (Arc<MemoryStore>, StoreHandle) {
    let store = Arc::new(MemoryStore::new());
    let handle: StoreHandle = store.clone();
    (store, handle)
}

pub fn get(path: &str) -> ResourceRequest {
    ResourceRequest::get(&format!("{ORIGIN}{path}")).expect("valid test url")
}

pub fn body(response: &ResponseSnapshot) -> &str {
    std::str::from_utf8(&response.body).expect("utf-8 body")
}

/// Poll until `partition` holds `key` with `expected` body, or give up
pub async fn wait_for_body(store: &MemoryStore, partition: &str, key: &str, expected: &str) -> bool {
    for _ in 0..200 {
        if let Ok(Some(entry)) = store.get(partition, key).await
            && entry.payload.body.as_ref() == expected.as_bytes()
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
