//! Origin client

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use strata_storage::ResponseSnapshot;
use tracing::{debug, info};

use crate::error::NetworkError;
use crate::request::ResourceRequest;

/// Headers that describe a single connection and must not be forwarded or stored
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Network access used by the strategy engine
///
/// `Err` means the fetch itself failed (transport error, refused
/// connection). An HTTP error status is still a successful fetch.
#[async_trait]
pub trait Origin: Send + Sync {
    async fn fetch(&self, request: &ResourceRequest) -> Result<ResponseSnapshot, NetworkError>;
}

/// Origin client configuration
#[derive(Clone, Debug, Default)]
pub struct HttpOriginConfig {
    /// User agent sent upstream
    pub user_agent: Option<String>,
    /// Skip TLS certificate verification
    pub skip_tls_verify: bool,
    /// Optional per-request timeout (none by default)
    pub timeout: Option<Duration>,
}

/// reqwest-backed origin client
pub struct HttpOrigin {
    client: Client,
}

impl HttpOrigin {
    /// Create a new origin client
    pub fn new(config: HttpOriginConfig) -> Result<Self, NetworkError> {
        let mut builder = Client::builder();

        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.as_str());
        }
        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder.build()?;
        info!("Created origin client");

        Ok(Self { client })
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn fetch(&self, request: &ResourceRequest) -> Result<ResponseSnapshot, NetworkError> {
        debug!("Fetching {} {}", request.method, request.url);

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in &request.headers {
            if !is_hop_by_hop(name) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        debug!("Origin answered {} for {}", status, request.url);
        Ok(ResponseSnapshot::new(status, headers, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_filter() {
        assert!(is_hop_by_hop("Transfer-Encoding"));
        assert!(is_hop_by_hop("host"));
        assert!(!is_hop_by_hop("content-type"));
        assert!(!is_hop_by_hop("cache-control"));
    }

    #[tokio::test]
    async fn test_unreachable_origin_is_a_network_error() {
        let origin = HttpOrigin::new(HttpOriginConfig::default()).unwrap();
        // Port 9 (discard) on loopback is closed in test environments
        let request = ResourceRequest::get("http://127.0.0.1:9/").unwrap();
        assert!(matches!(origin.fetch(&request).await, Err(NetworkError::Http(_))));
    }
}
