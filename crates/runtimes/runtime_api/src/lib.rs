//! zimage_runtime_api - Chat backend traits and types
//!
//! The prompt generator talks to a language model through [`ChatBackend`],
//! so providers can be swapped (or mocked in tests) without touching the
//! enhancement loop.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Chat message for inference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request for chat completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.7
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Response from chat completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    #[serde(default)]
    pub tokens_used: u32,
    #[serde(default)]
    pub finish_reason: String,
}

/// A language model that answers chat requests
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Provider name shown to the user
    fn name(&self) -> &str;

    /// Model identifier sent with each request
    fn model(&self) -> &str;

    /// Run a chat completion (non-streaming)
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;
}
