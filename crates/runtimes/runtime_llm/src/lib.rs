//! zimage_runtime_llm - Language model runtime
//!
//! Talks to any OpenAI-compatible chat endpoint (Ollama, OpenAI, Grok)
//! and turns short template descriptions into detailed image prompts.

mod enhance;
mod openai;

pub use enhance::{Enhancement, PromptEnhancer, RetryPolicy};
pub use openai::OpenAiCompatible;
