//! Outbound HTTP capability port
//!
//! Used by HTTP_REQUEST and WEBHOOK nodes. A non-2xx response is a
//! successful fetch; the node returns the status and a downstream
//! CONDITION can branch on it. Only transport failures are errors.

use std::collections::BTreeMap;

use async_trait::async_trait;
use atelier_core::Result;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: "POST".to_string(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: Some(body),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON when the body is JSON, raw text as a string otherwise.
    pub body: Value,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse>;
}
