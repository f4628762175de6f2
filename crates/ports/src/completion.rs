//! LLM completion capability port
//!
//! Injected interface for text completion; implementations honor a
//! deterministic mock mode when no API key is configured.

use async_trait::async_trait;
use atelier_core::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub tokens_used: u64,
}

#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}
