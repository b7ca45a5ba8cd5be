//! API routes

mod control;
mod events;
mod health;
mod intercept;
pub mod metrics;
mod relay;

use axum::{Router, extract::DefaultBodyLimit};
use std::sync::Arc;

use crate::state::{AppState, MetricsHandle};

/// Largest request body forwarded to the origin (16MB)
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Create the main router
pub fn create_router(state: AppState, metrics_handle: Option<Arc<MetricsHandle>>) -> Router {
    let mut router = Router::new()
        .merge(health::routes())
        .merge(control::routes())
        .merge(relay::routes())
        .merge(events::routes())
        // Everything else is an intercepted resource request
        .fallback(intercept::intercept)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    if let Some(handle) = metrics_handle {
        router = router.merge(metrics::routes(handle));
    }

    router
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use axum::response::Response;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use strata_core::{
        ControlChannel, EvictionPolicy, NotificationRelay, Registration, ResourceRule,
        StrategyKind, Worker, WorkerOptions,
    };
    use strata_origin::{NetworkError, Origin, ResourceRequest};
    use strata_storage::{MemoryStore, ResponseSnapshot, StoreHandle};
    use url::Url;

    use crate::state::AppState;

    pub const ORIGIN: &str = "http://app.test";

    /// Origin double keyed by full URL
    #[derive(Default)]
    pub struct FakeOrigin {
        routes: Mutex<HashMap<String, ResponseSnapshot>>,
        offline: AtomicBool,
        calls: AtomicUsize,
    }

    impl FakeOrigin {
        pub fn serve(&self, url: &str, body: &str) {
            self.routes
                .lock()
                .insert(url.to_string(), ResponseSnapshot::new(200, vec![], body.to_string()));
        }

        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Origin for FakeOrigin {
        async fn fetch(&self, request: &ResourceRequest) -> Result<ResponseSnapshot, NetworkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(NetworkError::Unreachable(request.url.to_string()));
            }
            Ok(self
                .routes
                .lock()
                .get(request.url.as_str())
                .cloned()
                .unwrap_or_else(|| ResponseSnapshot::new(404, vec![], "not found")))
        }
    }

    pub struct Harness {
        pub state: AppState,
        pub origin: Arc<FakeOrigin>,
    }

    /// Registration with version v1 active and two rules:
    /// `/` cache-first into `static`, `/api/**` network-first into `api`
    pub async fn harness() -> Harness {
        let store: StoreHandle = Arc::new(MemoryStore::new());
        let origin = Arc::new(FakeOrigin::default());
        origin.serve(&format!("{ORIGIN}/"), "index");
        let origin_url = Url::parse(ORIGIN).unwrap();

        let registration = Registration::new(
            "focus",
            origin_url.clone(),
            store.clone(),
            NotificationRelay::default(),
        );
        let worker = Worker::new(
            WorkerOptions {
                app_prefix: "focus".to_string(),
                version: "v1".to_string(),
                origin: origin_url,
                rules: vec![
                    ResourceRule::new("/", StrategyKind::CacheFirst, "static"),
                    ResourceRule::new("/api/**", StrategyKind::NetworkFirst, "api"),
                ],
                default_partition: "dynamic".to_string(),
                precache: vec!["/".to_string()],
                eviction_policy: EvictionPolicy::Fifo,
            },
            store,
            origin.clone(),
        );
        registration.install(Arc::new(worker)).await.unwrap();

        let (control, _) = ControlChannel::spawn(registration.clone());
        Harness {
            state: AppState::new(registration, control),
            origin,
        }
    }

    pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }
}
