//! Outbound HTTP adapters
//!
//! `ReqwestFetcher` backs HTTP_REQUEST and WEBHOOK nodes. Response bodies
//! parse as JSON when possible, falling back to raw text; non-2xx status
//! is a successful fetch by contract. `MockFetcher` scripts responses for
//! tests.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atelier_core::{DomainError, Result};
use atelier_ports::{FetchRequest, FetchResponse, HttpFetch};
use serde_json::Value;
use tokio::sync::Mutex;

pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::Infrastructure(format!("build http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        let method = reqwest::Method::from_str(&request.method.to_uppercase())
            .map_err(|_| DomainError::validation(format!("invalid method {}", request.method)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DomainError::Infrastructure(format!("fetch {}: {e}", request.url)))?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();

        let text = response
            .text()
            .await
            .map_err(|e| DomainError::Infrastructure(format!("read body: {e}")))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

type ScriptedResult = Result<FetchResponse>;

/// Scripted fetcher: responses are served in FIFO order and every request
/// is recorded for assertions.
#[derive(Default)]
pub struct MockFetcher {
    responses: Mutex<Vec<ScriptedResult>>,
    requests: Arc<Mutex<Vec<FetchRequest>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script(&self, result: ScriptedResult) {
        self.responses.lock().await.push(result);
    }

    pub async fn script_status(&self, status: u16, body: Value) {
        self.script(Ok(FetchResponse {
            status,
            headers: BTreeMap::new(),
            body,
        }))
        .await;
    }

    pub async fn script_error(&self, message: &str) {
        self.script(Err(DomainError::Infrastructure(message.to_string())))
            .await;
    }

    pub async fn recorded(&self) -> Vec<FetchRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl HttpFetch for MockFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        self.requests.lock().await.push(request);
        let mut responses = self.responses.lock().await;
        if responses.is_empty() {
            // Unscripted requests succeed blandly.
            return Ok(FetchResponse {
                status: 200,
                headers: BTreeMap::new(),
                body: Value::Null,
            });
        }
        responses.remove(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn mock_serves_scripted_responses_in_order() {
        let mock = MockFetcher::new();
        mock.script_status(200, json!({"ok": true})).await;
        mock.script_error("connection refused").await;

        let first = mock.fetch(FetchRequest::get("http://a")).await.unwrap();
        assert_eq!(first.status, 200);
        assert!(first.is_success());

        let second = mock.fetch(FetchRequest::get("http://b")).await;
        assert!(second.is_err());

        let recorded = mock.recorded().await;
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].url, "http://a");
    }
}
