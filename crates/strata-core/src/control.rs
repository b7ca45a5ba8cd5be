//! Runtime control channel
//!
//! Callers post a [`WireMessage`] together with a reply handle; a dispatcher
//! task receives messages one at a time and runs each handler on its own
//! task. Unknown message types are dropped without a reply.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::lifecycle::Registration;

const CHANNEL_CAPACITY: usize = 32;

/// `{ "type": ..., "payload": ... }` as exchanged with callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl WireMessage {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: None,
        }
    }

    pub fn with_payload(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload: Some(payload),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self::with_payload("ERROR", json!({ "message": message.into() }))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ClearCachePayload {
    #[serde(default, alias = "cacheName")]
    partition: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PrecachePayload {
    urls: Vec<String>,
}

/// A decoded control request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    SkipWaiting,
    GetCacheStats,
    /// Clear one partition (logical or storage name), or all when `None`
    ClearCache { partition: Option<String> },
    PrecacheResources { urls: Vec<String> },
}

impl ControlCommand {
    /// Decode a wire message; `Ok(None)` for an unknown type
    pub fn from_wire(message: &WireMessage) -> Result<Option<Self>, serde_json::Error> {
        let payload = message.payload.clone().unwrap_or(Value::Null);
        let command = match message.kind.as_str() {
            "SKIP_WAITING" => ControlCommand::SkipWaiting,
            "GET_CACHE_STATS" => ControlCommand::GetCacheStats,
            "CLEAR_CACHE" => {
                let payload: ClearCachePayload = if payload.is_null() {
                    ClearCachePayload::default()
                } else {
                    serde_json::from_value(payload)?
                };
                ControlCommand::ClearCache {
                    partition: payload.partition,
                }
            }
            "PRECACHE_RESOURCES" => {
                let payload: PrecachePayload = serde_json::from_value(payload)?;
                ControlCommand::PrecacheResources { urls: payload.urls }
            }
            _ => return Ok(None),
        };
        Ok(Some(command))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionStats {
    pub name: String,
    pub entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub partitions: Vec<PartitionStats>,
    pub total: usize,
}

/// A message in flight together with its reply handle
pub struct ControlMessage {
    pub message: WireMessage,
    pub reply: oneshot::Sender<WireMessage>,
}

/// Sending half of the control channel
#[derive(Clone)]
pub struct ControlChannel {
    tx: mpsc::Sender<ControlMessage>,
}

impl ControlChannel {
    /// Start the dispatcher for `registration`
    pub fn spawn(registration: Arc<Registration>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<ControlMessage>(CHANNEL_CAPACITY);

        let handle = tokio::spawn(async move {
            while let Some(ControlMessage { message, reply }) = rx.recv().await {
                let registration = registration.clone();
                tokio::spawn(async move {
                    dispatch(&registration, message, reply).await;
                });
            }
            debug!("Control channel closed");
        });

        (Self { tx }, handle)
    }

    /// Post a message with a caller-provided reply handle
    pub async fn send(&self, message: ControlMessage) -> Result<(), CoreError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| CoreError::ChannelClosed)
    }

    /// Post a message and wait for the reply; `None` when no reply is sent
    pub async fn request(&self, message: WireMessage) -> Result<Option<WireMessage>, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlMessage { message, reply }).await?;
        Ok(rx.await.ok())
    }
}

async fn dispatch(
    registration: &Registration,
    message: WireMessage,
    reply: oneshot::Sender<WireMessage>,
) {
    metrics::counter!("strata_control_messages_total", "type" => message.kind.clone())
        .increment(1);

    let response = match ControlCommand::from_wire(&message) {
        Ok(Some(command)) => execute(registration, command)
            .await
            .unwrap_or_else(|e| {
                warn!("Control message {} failed: {}", message.kind, e);
                WireMessage::error(e.to_string())
            }),
        Ok(None) => {
            warn!("Ignoring unknown control message {}", message.kind);
            return;
        }
        Err(e) => {
            warn!("Malformed {} payload: {}", message.kind, e);
            WireMessage::error(e.to_string())
        }
    };

    if reply.send(response).is_err() {
        debug!("Caller of {} went away before the reply", message.kind);
    }
}

async fn execute(registration: &Registration, command: ControlCommand) -> Result<WireMessage, CoreError> {
    match command {
        ControlCommand::SkipWaiting => {
            let activated = registration.skip_waiting().await?;
            Ok(WireMessage::with_payload(
                "SKIP_WAITING_ACK",
                json!({ "activated": activated }),
            ))
        }
        ControlCommand::GetCacheStats => {
            let stats = registration.cache_stats().await?;
            Ok(WireMessage::with_payload(
                "CACHE_STATS",
                serde_json::to_value(stats)?,
            ))
        }
        ControlCommand::ClearCache { partition } => {
            let cleared = registration.clear_cache(partition.as_deref()).await?;
            info!("Control channel cleared {} partitions", cleared.len());
            Ok(WireMessage::with_payload(
                "CACHE_CLEARED",
                json!({ "cleared": cleared }),
            ))
        }
        ControlCommand::PrecacheResources { urls } => {
            let report = registration.precache(&urls).await?;
            Ok(WireMessage::with_payload(
                "PRECACHE_COMPLETE",
                serde_json::to_value(report)?,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eviction::EvictionPolicy;
    use crate::lifecycle::{Worker, WorkerOptions};
    use crate::relay::NotificationRelay;
    use crate::testing::{ORIGIN, StubOrigin, memory_store};
    use strata_storage::{CacheEntry, MemoryStore, PartitionStore, ResponseSnapshot};
    use url::Url;

    async fn setup() -> (Arc<MemoryStore>, Arc<StubOrigin>, ControlChannel) {
        let (store, handle) = memory_store();
        let origin = StubOrigin::new();
        let registration = Registration::new(
            "focus",
            Url::parse(ORIGIN).unwrap(),
            handle.clone(),
            NotificationRelay::default(),
        );
        let worker = Worker::new(
            WorkerOptions {
                app_prefix: "focus".to_string(),
                version: "v1".to_string(),
                origin: Url::parse(ORIGIN).unwrap(),
                rules: vec![],
                default_partition: "dynamic".to_string(),
                precache: vec![],
                eviction_policy: EvictionPolicy::Fifo,
            },
            handle,
            origin.clone(),
        );
        registration.install(Arc::new(worker)).await.unwrap();
        let (channel, _) = ControlChannel::spawn(registration);
        (store, origin, channel)
    }

    async fn fill(store: &MemoryStore, partition: &str, count: usize) {
        for i in 0..count {
            store
                .put(
                    partition,
                    CacheEntry::new(format!("GET /{i}"), ResponseSnapshot::new(200, vec![], "x")),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_stats_round_trip() {
        let (store, _origin, channel) = setup().await;
        fill(&store, "focus-v1-static", 3).await;
        fill(&store, "focus-v1-api", 2).await;

        let reply = channel
            .request(WireMessage::new("GET_CACHE_STATS"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.kind, "CACHE_STATS");

        let payload = reply.payload.unwrap();
        assert_eq!(payload["total"], 5);
        let mut partitions: Vec<(String, u64)> = payload["partitions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| (p["name"].as_str().unwrap().to_string(), p["entries"].as_u64().unwrap()))
            .collect();
        partitions.sort();
        assert_eq!(
            partitions,
            vec![
                ("focus-v1-api".to_string(), 2),
                ("focus-v1-static".to_string(), 3)
            ]
        );
    }

    #[tokio::test]
    async fn test_clear_all_resets_total() {
        let (store, _origin, channel) = setup().await;
        fill(&store, "focus-v1-static", 3).await;
        fill(&store, "focus-v1-api", 2).await;

        let reply = channel
            .request(WireMessage::new("CLEAR_CACHE"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.kind, "CACHE_CLEARED");

        let stats = channel
            .request(WireMessage::new("GET_CACHE_STATS"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.payload.unwrap()["total"], 0);
    }

    #[tokio::test]
    async fn test_clear_by_logical_name() {
        let (store, _origin, channel) = setup().await;
        fill(&store, "focus-v1-static", 1).await;
        fill(&store, "focus-v1-api", 1).await;

        let reply = channel
            .request(WireMessage::with_payload(
                "CLEAR_CACHE",
                json!({ "partition": "api" }),
            ))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reply.payload.unwrap()["cleared"], json!(["focus-v1-api"]));
        assert_eq!(store.partitions().await.unwrap(), vec!["focus-v1-static"]);
    }

    #[tokio::test]
    async fn test_unknown_message_gets_no_reply() {
        let (_store, _origin, channel) = setup().await;
        let reply = channel.request(WireMessage::new("REBOOT")).await.unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_malformed_payload_replies_with_error() {
        let (_store, _origin, channel) = setup().await;
        let reply = channel
            .request(WireMessage::new("PRECACHE_RESOURCES"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.kind, "ERROR");
    }

    #[tokio::test]
    async fn test_precache_resources() {
        let (store, origin, channel) = setup().await;
        origin.serve("/sounds/bell.mp3", "ding");

        let reply = channel
            .request(WireMessage::with_payload(
                "PRECACHE_RESOURCES",
                json!({ "urls": ["/sounds/bell.mp3", "/sounds/missing.mp3"] }),
            ))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reply.kind, "PRECACHE_COMPLETE");
        let payload = reply.payload.unwrap();
        assert_eq!(payload["cached"], json!(["/sounds/bell.mp3"]));
        assert_eq!(payload["failed"], json!(["/sounds/missing.mp3"]));
        assert_eq!(store.len("focus-v1-static").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_skip_waiting_without_waiting_version() {
        let (_store, _origin, channel) = setup().await;
        let reply = channel
            .request(WireMessage::new("SKIP_WAITING"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.kind, "SKIP_WAITING_ACK");
        assert_eq!(reply.payload.unwrap()["activated"], false);
    }

    #[test]
    fn test_decode_commands() {
        let clear = WireMessage::with_payload("CLEAR_CACHE", json!({ "cacheName": "focus-v1-api" }));
        assert_eq!(
            ControlCommand::from_wire(&clear).unwrap(),
            Some(ControlCommand::ClearCache {
                partition: Some("focus-v1-api".to_string())
            })
        );
        assert_eq!(
            ControlCommand::from_wire(&WireMessage::new("UNKNOWN")).unwrap(),
            None
        );
    }
}
