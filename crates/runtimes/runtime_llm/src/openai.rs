//! Client for the `/chat/completions` endpoint shared by Ollama, OpenAI
//! and xAI.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use zimage_core::config::ActiveProvider;
use zimage_runtime_api::{ChatBackend, ChatMessage, ChatRequest, ChatResponse};

#[derive(Debug, Clone)]
pub struct OpenAiCompatible {
    client: Client,
    name: String,
    model: String,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u32,
}

impl OpenAiCompatible {
    pub fn new(provider: &ActiveProvider, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            name: provider.display_name.to_string(),
            model: provider.settings.model.clone(),
            endpoint: completions_url(&provider.settings.base_url),
            api_key: provider
                .settings
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
        })
    }
}

fn completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

fn into_chat_response(response: CompletionResponse) -> Result<ChatResponse> {
    let tokens_used = response.usage.map(|u| u.total_tokens).unwrap_or(0);
    let choice = response
        .choices
        .into_iter()
        .next()
        .context("Response contained no choices")?;

    Ok(ChatResponse {
        content: choice.message.content.unwrap_or_default(),
        tokens_used,
        finish_reason: choice.finish_reason.unwrap_or_default(),
    })
}

#[async_trait]
impl ChatBackend for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = CompletionRequest {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: false,
        };
        tracing::debug!("POST {} ({} messages)", self.endpoint, body.messages.len());

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let res = builder
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.name))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            anyhow::bail!("{} error {}: {}", self.name, status, text);
        }

        let response: CompletionResponse = res
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        into_chat_response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zimage_core::config::ProviderSettings;

    #[test]
    fn test_completions_url() {
        assert_eq!(
            completions_url("http://localhost:11434/v1"),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(
            completions_url("https://api.x.ai/v1/"),
            "https://api.x.ai/v1/chat/completions"
        );
    }

    #[test]
    fn test_blank_api_key_is_not_sent() {
        let provider = ActiveProvider {
            display_name: "Ollama",
            settings: ProviderSettings {
                model: "gemma3:27b".to_string(),
                base_url: "http://localhost:11434/v1".to_string(),
                api_key: Some("  ".to_string()),
            },
        };
        let client = OpenAiCompatible::new(&provider, Duration::from_secs(5)).unwrap();
        assert_eq!(client.name(), "Ollama");
        assert_eq!(client.model(), "gemma3:27b");
        assert!(client.api_key.is_none());
    }

    #[test]
    fn test_request_body() {
        let messages = vec![ChatMessage::user("hello")];
        let body = CompletionRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            max_tokens: 1024,
            temperature: 0.7,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hello");
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_parse_response() {
        let raw = r#"{
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "A detailed prompt"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let parsed: CompletionResponse = serde_json::from_str(raw).unwrap();
        let response = into_chat_response(parsed).unwrap();
        assert_eq!(response.content, "A detailed prompt");
        assert_eq!(response.tokens_used, 15);
        assert_eq!(response.finish_reason, "stop");
    }

    #[test]
    fn test_parse_response_without_choices() {
        let parsed: CompletionResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(into_chat_response(parsed).is_err());
    }
}
