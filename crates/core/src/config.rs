use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// Supported LLM providers (all speak the OpenAI chat-completions API)
pub const PROVIDERS: &[&str] = &["ollama", "openai", "grok"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid LLM_PROVIDER: '{0}'. Supported providers: {list}", list = PROVIDERS.join(", "))]
    InvalidProvider(String),

    #[error("{var} environment variable is required for the {provider} provider. Please set it in your .env file.")]
    MissingApiKey {
        provider: &'static str,
        var: &'static str,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// LLM provider settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Model download settings
    #[serde(default)]
    pub models: ModelsConfig,

    /// Diffusion sampling settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Default input and output locations
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// One of `ollama`, `openai`, `grok`
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_ollama")]
    pub ollama: ProviderSettings,

    #[serde(default = "default_openai")]
    pub openai: ProviderSettings,

    #[serde(default = "default_grok")]
    pub grok: ProviderSettings,

    /// Attempts per request before falling back
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause between attempts
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub model: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Validated provider, ready to build a client from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveProvider {
    /// Human readable name, e.g. "Grok (xAI)"
    pub display_name: &'static str,
    pub settings: ProviderSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// HuggingFace repo of the diffusion model
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// Directory to store models (default: ./models)
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// HuggingFace token for gated models
    #[serde(default)]
    pub hf_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_steps")]
    pub steps: u32,

    /// Turbo models are distilled for guidance 0
    #[serde(default)]
    pub guidance_scale: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_images_dir")]
    pub images_dir: PathBuf,

    #[serde(default = "default_prompts_file")]
    pub prompts_file: PathBuf,

    /// Template for generate-prompts (built-in template when unset)
    #[serde(default)]
    pub template_file: Option<PathBuf>,

    /// Instruction for generate-prompts (built-in instruction when unset)
    #[serde(default)]
    pub instruction_file: Option<PathBuf>,
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_ollama() -> ProviderSettings {
    ProviderSettings {
        model: "gemma3:27b".to_string(),
        base_url: "http://localhost:11434/v1".to_string(),
        api_key: None,
    }
}

fn default_openai() -> ProviderSettings {
    ProviderSettings {
        model: "gpt-4o-mini".to_string(),
        base_url: "https://api.openai.com/v1".to_string(),
        api_key: None,
    }
}

fn default_grok() -> ProviderSettings {
    ProviderSettings {
        model: "grok-3-mini".to_string(),
        base_url: "https://api.x.ai/v1".to_string(),
        api_key: None,
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_model_id() -> String {
    "Tongyi-MAI/Z-Image-Turbo".to_string()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("models")
}

fn default_steps() -> u32 {
    9
}

fn default_images_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_prompts_file() -> PathBuf {
    PathBuf::from("input/prompts/prompts.json")
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            ollama: default_ollama(),
            openai: default_openai(),
            grok: default_grok(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            model_id: default_model_id(),
            storage_path: default_storage_path(),
            hf_token: None,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            guidance_scale: 0.0,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            images_dir: default_images_dir(),
            prompts_file: default_prompts_file(),
            template_file: None,
            instruction_file: None,
        }
    }
}

impl LlmConfig {
    /// Validate the configured provider and its credentials
    pub fn active_provider(&self) -> Result<ActiveProvider, ConfigError> {
        let (display_name, settings, key_var) = match self.provider.trim().to_lowercase().as_str() {
            "ollama" => ("Ollama", &self.ollama, None),
            "openai" => ("OpenAI", &self.openai, Some("OPENAI_API_KEY")),
            "grok" => ("Grok (xAI)", &self.grok, Some("GROK_API_KEY")),
            _ => return Err(ConfigError::InvalidProvider(self.provider.clone())),
        };

        if let Some(var) = key_var {
            let has_key = settings
                .api_key
                .as_deref()
                .is_some_and(|key| !key.trim().is_empty());
            if !has_key {
                return Err(ConfigError::MissingApiKey {
                    provider: display_name,
                    var,
                });
            }
        }

        Ok(ActiveProvider {
            display_name,
            settings: settings.clone(),
        })
    }
}

impl Config {
    /// Get the base directory: ~/.config/zimage/
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
        Ok(home.join(".config").join("zimage"))
    }

    /// Get the config file path: ~/.config/zimage/config.toml
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.toml"))
    }

    /// Load config from the default location, then apply `.env` and
    /// environment overrides. Built once per process.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Ok(path) if path.exists() => {
                let content = fs::read_to_string(&path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::debug!("Loaded config from {}", path.display());
                config
            }
            _ => Config::default(),
        };

        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override settings from environment-style variables. Empty values
    /// are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(provider) = get("LLM_PROVIDER") {
            self.llm.provider = provider.trim().to_lowercase();
        }

        for (prefix, url_var, settings) in [
            ("OLLAMA", "OLLAMA_URL", &mut self.llm.ollama),
            ("OPENAI", "OPENAI_BASE_URL", &mut self.llm.openai),
            ("GROK", "GROK_BASE_URL", &mut self.llm.grok),
        ] {
            if let Some(model) = get(&format!("{}_MODEL", prefix)) {
                settings.model = model;
            }
            if let Some(url) = get(url_var) {
                settings.base_url = url;
            }
            if let Some(key) = get(&format!("{}_API_KEY", prefix)) {
                settings.api_key = Some(key);
            }
        }

        if let Some(token) = get("HF_TOKEN") {
            self.models.hf_token = Some(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut config = Config::default();
        config.apply_env(|key| env.get(key).cloned());
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.max_retries, 3);
        assert_eq!(config.generation.steps, 9);
        assert_eq!(config.models.model_id, "Tongyi-MAI/Z-Image-Turbo");
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let provider = config_with(&[]).llm.active_provider().unwrap();
        assert_eq!(provider.display_name, "Ollama");
        assert_eq!(provider.settings.model, "gemma3:27b");
        assert_eq!(provider.settings.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn test_env_overrides() {
        let config = config_with(&[
            ("LLM_PROVIDER", "OpenAI"),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "gpt-4.1"),
            ("OPENAI_BASE_URL", "http://proxy/v1"),
            ("OLLAMA_URL", "http://gpu-box:11434/v1"),
        ]);
        let provider = config.llm.active_provider().unwrap();
        assert_eq!(provider.display_name, "OpenAI");
        assert_eq!(provider.settings.model, "gpt-4.1");
        assert_eq!(provider.settings.base_url, "http://proxy/v1");
        assert_eq!(provider.settings.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.llm.ollama.base_url, "http://gpu-box:11434/v1");
    }

    #[test]
    fn test_missing_api_key() {
        let err = config_with(&[("LLM_PROVIDER", "grok"), ("GROK_API_KEY", "  ")])
            .llm
            .active_provider()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingApiKey {
                provider: "Grok (xAI)",
                var: "GROK_API_KEY",
            }
        );
        assert!(err.to_string().contains("GROK_API_KEY"));
    }

    #[test]
    fn test_invalid_provider() {
        let err = config_with(&[("LLM_PROVIDER", "claude")])
            .llm
            .active_provider()
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidProvider("claude".to_string()));
        assert_eq!(
            err.to_string(),
            "Invalid LLM_PROVIDER: 'claude'. Supported providers: ollama, openai, grok"
        );
    }

    #[test]
    fn test_toml_sections_default() {
        let config: Config = toml::from_str(
            r#"
            [llm]
            provider = "grok"

            [llm.grok]
            model = "grok-4"
            base_url = "https://api.x.ai/v1"
            api_key = "xai-key"

            [generation]
            steps = 12
            "#,
        )
        .unwrap();
        assert_eq!(config.llm.grok.model, "grok-4");
        assert_eq!(config.llm.openai, default_openai());
        assert_eq!(config.generation.steps, 12);
        assert_eq!(config.generation.guidance_scale, 0.0);
        assert_eq!(config.output.images_dir, PathBuf::from("output"));
        assert!(config.llm.active_provider().is_ok());
    }
}
