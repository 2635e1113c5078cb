//! Expand template descriptions into detailed prompts

use std::time::Duration;
use zimage_core::config::LlmConfig;
use zimage_core::prompts::render_instruction;
use zimage_core::template::fallback_prompt;
use zimage_runtime_api::{ChatBackend, ChatMessage, ChatRequest};

/// How often to ask the model before giving up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least one
    pub attempts: u32,
    /// Fixed pause between attempts
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            attempts: config.max_retries.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Outcome of one enhancement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enhancement {
    /// Text written by the model
    Llm(String),
    /// Every attempt failed; canned enrichment of the description
    Fallback { text: String, reason: String },
}

impl Enhancement {
    pub fn text(&self) -> &str {
        match self {
            Enhancement::Llm(text) => text,
            Enhancement::Fallback { text, .. } => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Enhancement::Llm(text) => text,
            Enhancement::Fallback { text, .. } => text,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Enhancement::Fallback { .. })
    }
}

pub struct PromptEnhancer {
    backend: Box<dyn ChatBackend>,
    instruction: String,
    policy: RetryPolicy,
}

impl PromptEnhancer {
    /// `instruction` must contain the `{template_description}` placeholder
    pub fn new(backend: Box<dyn ChatBackend>, instruction: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            instruction: instruction.into(),
            policy,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    /// Ask the model to expand `description`. Never fails: after the last
    /// failed attempt the canned fallback is returned instead.
    pub async fn enhance(&self, description: &str) -> Enhancement {
        let request = ChatRequest::new(vec![ChatMessage::user(render_instruction(
            &self.instruction,
            description,
        ))]);
        let name = self.backend.name();
        let attempts = self.policy.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            tracing::info!("Attempt {}/{}: Sending request to {}...", attempt, attempts, name);

            match self.backend.chat(request.clone()).await {
                Ok(response) if !response.content.trim().is_empty() => {
                    tracing::info!("Received response from {}", name);
                    return Enhancement::Llm(response.content.trim().to_string());
                }
                Ok(_) => last_error = "empty response".to_string(),
                Err(e) => last_error = format!("{:#}", e),
            }

            tracing::warn!("Attempt {}/{} failed: {}", attempt, attempts, last_error);
            if attempt < attempts && !self.policy.backoff.is_zero() {
                tokio::time::sleep(self.policy.backoff).await;
            }
        }

        tracing::warn!("Using fallback prompt generation method");
        Enhancement::Fallback {
            text: fallback_prompt(description),
            reason: last_error,
        }
    }
}
