//! Intercepted request model

use bytes::Bytes;
use http::Method;
use url::Url;

use crate::error::NetworkError;

/// A resource request offered to the proxy
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ResourceRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Build a GET request for an absolute URL
    pub fn get(url: &str) -> Result<Self, NetworkError> {
        Ok(Self::new(Method::GET, Url::parse(url)?))
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Normalized request identity: method plus URL without fragment
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        format!("{} {}", self.method, url)
    }

    /// Path component matched against resource rules
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Only GET responses are ever stored
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::GET
    }

    /// Whether this request targets the same scheme, host and port as `base`
    pub fn is_same_origin(&self, base: &Url) -> bool {
        self.url.origin() == base.origin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_drops_fragment() {
        let request = ResourceRequest::get("http://localhost:3000/app.js?v=2#top").unwrap();
        assert_eq!(request.cache_key(), "GET http://localhost:3000/app.js?v=2");
        assert_eq!(request.path(), "/app.js");
    }

    #[test]
    fn test_same_origin() {
        let base = Url::parse("http://localhost:3000/").unwrap();
        assert!(ResourceRequest::get("http://localhost:3000/x").unwrap().is_same_origin(&base));
        assert!(!ResourceRequest::get("http://localhost:4000/x").unwrap().is_same_origin(&base));
        assert!(!ResourceRequest::get("https://cdn.example.com/x").unwrap().is_same_origin(&base));
    }

    #[test]
    fn test_only_get_is_cacheable() {
        let url = Url::parse("http://localhost:3000/api/tasks").unwrap();
        assert!(ResourceRequest::new(Method::GET, url.clone()).is_cacheable());
        assert!(!ResourceRequest::new(Method::POST, url).is_cacheable());
    }
}
