//! Cache entry model

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A response detached from its connection, ready to be stored or replayed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ResponseSnapshot {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Look up a header value (case-insensitive name)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the origin forbade storing this response
    pub fn is_no_store(&self) -> bool {
        self.cache_control_directives()
            .any(|d| d.eq_ignore_ascii_case("no-store"))
    }

    /// Freshness budget announced by the origin via `Cache-Control: max-age`
    pub fn max_age(&self) -> Option<Duration> {
        self.cache_control_directives().find_map(|d| {
            let (name, value) = d.split_once('=')?;
            if !name.trim().eq_ignore_ascii_case("max-age") {
                return None;
            }
            value.trim().trim_matches('"').parse().ok().map(Duration::from_secs)
        })
    }

    /// Approximate footprint in bytes (body plus header text)
    pub fn size_estimate(&self) -> u64 {
        let headers: usize = self.headers.iter().map(|(k, v)| k.len() + v.len()).sum();
        (self.body.len() + headers) as u64
    }

    fn cache_control_directives(&self) -> impl Iterator<Item = &str> {
        self.header("cache-control")
            .into_iter()
            .flat_map(|v| v.split(','))
            .map(str::trim)
    }
}

/// A stored response addressed by its normalized request key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub stored_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub size: u64,
    pub payload: ResponseSnapshot,
}

impl CacheEntry {
    /// Create an entry stamped with the current time
    pub fn new(key: impl Into<String>, payload: ResponseSnapshot) -> Self {
        Self::with_timestamp(key, payload, Utc::now())
    }

    pub fn with_timestamp(key: impl Into<String>, payload: ResponseSnapshot, at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            stored_at: at,
            last_accessed_at: at,
            size: payload.size_estimate(),
            payload,
        }
    }

    /// Age of the entry relative to `now`; clock skew clamps to zero
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.stored_at).to_std().unwrap_or_default()
    }

    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            key: self.key.clone(),
            stored_at: self.stored_at,
            last_accessed_at: self.last_accessed_at,
            size: self.size,
        }
    }
}

/// Entry metadata without the payload, used for eviction and stats
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryMeta {
    pub key: String,
    pub stored_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub size: u64,
}
