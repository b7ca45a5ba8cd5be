//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] strata_storage::StorageError),

    #[error("Network failure: {0}")]
    Network(#[from] strata_origin::NetworkError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Installation of version {version} failed: {reason}")]
    InstallationFailed { version: String, reason: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Background(#[from] tokio::task::JoinError),

    #[error("Control channel closed")]
    ChannelClosed,
}
