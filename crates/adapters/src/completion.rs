//! Completion capability adapters
//!
//! `HttpCompletion` talks to an OpenAI-compatible chat endpoint. When no
//! API key is configured the bootstrap wires `MockCompletion` instead: a
//! deterministic stand-in whose output depends only on the request, so
//! runs (and tests) are reproducible.

use async_trait::async_trait;
use atelier_core::{DomainError, Result};
use atelier_ports::{Completion, CompletionRequest, CompletionResponse};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

pub struct HttpCompletion {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl HttpCompletion {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

#[async_trait]
impl Completion for HttpCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.user_prompt}));

        let mut body = json!({
            "model": request.model,
            "messages": messages,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DomainError::Infrastructure(format!("completion request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(DomainError::Infrastructure(format!(
                "completion upstream returned {status}: {detail}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| DomainError::Infrastructure(format!("completion response: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| {
                DomainError::Infrastructure("completion returned no choices".to_string())
            })?;

        Ok(CompletionResponse {
            content,
            model: parsed.model.unwrap_or(request.model),
            tokens_used: parsed.usage.unwrap_or_default().total_tokens,
        })
    }
}

/// Deterministic mock: echoes the prompt with a stable digest suffix.
pub struct MockCompletion;

#[async_trait]
impl Completion for MockCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let mut hasher = Sha256::new();
        if let Some(system) = &request.system_prompt {
            hasher.update(system.as_bytes());
        }
        hasher.update(request.user_prompt.as_bytes());
        hasher.update(request.model.as_bytes());
        let digest = format!("{:x}", hasher.finalize());

        let preview: String = request.user_prompt.chars().take(80).collect();
        Ok(CompletionResponse {
            content: format!("[mock:{}] {preview}", &digest[..12]),
            model: request.model,
            tokens_used: (request.user_prompt.len() / 4) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            system_prompt: None,
            user_prompt: prompt.to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: None,
            max_tokens: None,
        }
    }

    #[tokio::test]
    async fn mock_is_deterministic() {
        let mock = MockCompletion;
        let a = mock.complete(request("summarize this")).await.unwrap();
        let b = mock.complete(request("summarize this")).await.unwrap();
        assert_eq!(a, b);
        assert!(a.content.starts_with("[mock:"));
    }

    #[tokio::test]
    async fn mock_varies_with_prompt() {
        let mock = MockCompletion;
        let a = mock.complete(request("one")).await.unwrap();
        let b = mock.complete(request("two")).await.unwrap();
        assert_ne!(a.content, b.content);
    }
}
