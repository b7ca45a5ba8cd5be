//! Background notification relay
//!
//! Forwards out-of-band events (deferred sync, push) to connected clients.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

const DEFAULT_TITLE: &str = "Strata";
const ROOT_URL: &str = "/";

/// Message delivered to every connected client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// A deferred sync ran
    SyncCompleted { tag: String },
    /// Show a user-visible notification
    Notification(Notification),
    /// Focus or open the given page of the client application
    OpenWindow { url: String },
    /// A new version took control of the clients
    ControllerChanged { version: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub actions: Vec<NotificationAction>,
}

/// Push message body as delivered by the push service
#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub title: Option<String>,
    pub body: String,
    #[serde(default)]
    pub actions: Vec<NotificationAction>,
}

fn default_actions() -> Vec<NotificationAction> {
    vec![
        NotificationAction {
            action: "open".to_string(),
            title: "Open".to_string(),
        },
        NotificationAction {
            action: "dismiss".to_string(),
            title: "Dismiss".to_string(),
        },
    ]
}

/// Fan-out channel to connected clients
#[derive(Clone)]
pub struct NotificationRelay {
    tx: broadcast::Sender<ClientMessage>,
}

impl NotificationRelay {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientMessage> {
        self.tx.subscribe()
    }

    /// Deliver a message, returning how many clients received it
    pub fn broadcast(&self, message: ClientMessage) -> usize {
        match self.tx.send(message) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(message)) => {
                debug!("No connected clients for {:?}", message);
                0
            }
        }
    }

    /// Re-broadcast a deferred sync signal
    pub fn sync(&self, tag: &str) -> usize {
        info!("Relaying sync event {}", tag);
        self.broadcast(ClientMessage::SyncCompleted {
            tag: tag.to_string(),
        })
    }

    /// Surface a push payload as a notification with open/dismiss actions
    pub fn push(&self, payload: PushPayload) -> Notification {
        let notification = Notification {
            title: payload.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            body: payload.body,
            actions: if payload.actions.is_empty() {
                default_actions()
            } else {
                payload.actions
            },
        };
        info!("Relaying push notification: {}", notification.body);
        self.broadcast(ClientMessage::Notification(notification.clone()));
        notification
    }

    /// React to a notification action; `open` asks the host to focus the app root
    pub fn notification_click(&self, action: &str) -> Option<ClientMessage> {
        match action {
            "open" => {
                let message = ClientMessage::OpenWindow {
                    url: ROOT_URL.to_string(),
                };
                self.broadcast(message.clone());
                Some(message)
            }
            _ => {
                debug!("Notification action {} needs no follow-up", action);
                None
            }
        }
    }
}

impl Default for NotificationRelay {
    fn default() -> Self {
        Self::new(64)
    }
}
