//! Configuration for the VQA toolkit.
//!
//! Supports both environment variables and YAML config file.
//! Environment variables take precedence over config file values.
//! The environment is only consulted here; every other module receives
//! an explicit [`Config`].

use crate::error::{Result, VqaError};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Text-generation service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL for the LLM API (e.g., "https://api.openai.com")
    pub api_base: String,

    /// API key for authentication (empty when unresolved)
    #[serde(default)]
    pub api_key: String,

    /// Environment variable consulted for the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model name (e.g., "gpt-4o")
    pub model: String,

    /// Maximum tokens for response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Temperature for generation
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    200
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com".to_string(),
            api_key: String::new(),
            api_key_env: default_api_key_env(),
            model: "gpt-4o".to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Vision-language model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Local directory or hub identifier of the pretrained model
    pub path: String,

    /// Compute device ("cpu", "cuda:0", "metal")
    pub device: String,

    /// Load weights in reduced precision
    #[serde(default = "default_quantize")]
    pub quantize: bool,

    /// Generation budget per answer
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,
}

fn default_quantize() -> bool {
    true
}

fn default_max_new_tokens() -> usize {
    150
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "google/paligemma-3b-mix-224".to_string(),
            device: "cuda:0".to_string(),
            quantize: default_quantize(),
            max_new_tokens: default_max_new_tokens(),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Text-generation settings
    pub llm: LlmConfig,
    /// Vision-language model settings
    #[serde(default)]
    pub model: ModelConfig,
}

/// Configuration file structure (YAML format).
#[derive(Debug, Deserialize)]
struct ConfigFile {
    llm: Option<LlmFileSection>,
    model: Option<ModelFileSection>,
}

#[derive(Debug, Deserialize)]
struct LlmFileSection {
    api_base: Option<String>,
    api_key: Option<String>,
    api_key_env: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ModelFileSection {
    path: Option<String>,
    device: Option<String>,
    quantize: Option<bool>,
    max_new_tokens: Option<usize>,
}

impl Config {
    /// Load configuration from environment variables and optional config file.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (LLM_API_BASE, LLM_API_KEY, LLM_MODEL, ...)
    /// 2. The variable named by `llm.api_key_env` (OPENAI_API_KEY by default)
    /// 3. Config file (~/.config/vqa-mix/config.yaml)
    /// 4. Default values
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        // Try to load from config file first
        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                config = Self::load_from_file(&config_path)?;
            }
        }

        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    /// Override values from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.llm.api_key.is_empty() {
            if let Some(key) = lookup(&self.llm.api_key_env) {
                self.llm.api_key = key;
            }
        }

        if let Some(api_base) = lookup("LLM_API_BASE") {
            self.llm.api_base = api_base;
        }

        if let Some(api_key) = lookup("LLM_API_KEY") {
            self.llm.api_key = api_key;
        }

        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = model;
        }

        if let Some(tokens) = lookup("LLM_MAX_TOKENS").and_then(|v| v.parse().ok()) {
            self.llm.max_tokens = tokens;
        }

        if let Some(temp) = lookup("LLM_TEMPERATURE").and_then(|v| v.parse().ok()) {
            self.llm.temperature = temp;
        }

        if let Some(secs) = lookup("LLM_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.llm.timeout_secs = secs;
        }

        if let Some(path) = lookup("VQA_MODEL_PATH") {
            self.model.path = path;
        }

        if let Some(device) = lookup("VQA_DEVICE") {
            self.model.device = device;
        }

        if let Some(quantize) = lookup("VQA_QUANTIZE").and_then(|v| v.parse().ok()) {
            self.model.quantize = quantize;
        }

        if let Some(tokens) = lookup("VQA_MAX_NEW_TOKENS").and_then(|v| v.parse().ok()) {
            self.model.max_new_tokens = tokens;
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| VqaError::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text, filling gaps with defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file_config: ConfigFile = serde_yaml::from_str(content)
            .map_err(|e| VqaError::Config(format!("Failed to parse config file: {}", e)))?;

        let mut config = Config::default();

        if let Some(llm) = file_config.llm {
            if let Some(api_base) = llm.api_base {
                config.llm.api_base = api_base;
            }
            if let Some(api_key) = llm.api_key {
                config.llm.api_key = api_key;
            }
            if let Some(api_key_env) = llm.api_key_env {
                config.llm.api_key_env = api_key_env;
            }
            if let Some(model) = llm.model {
                config.llm.model = model;
            }
            if let Some(max_tokens) = llm.max_tokens {
                config.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                config.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                config.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(model) = file_config.model {
            if let Some(path) = model.path {
                config.model.path = path;
            }
            if let Some(device) = model.device {
                config.model.device = device;
            }
            if let Some(quantize) = model.quantize {
                config.model.quantize = quantize;
            }
            if let Some(max_new_tokens) = model.max_new_tokens {
                config.model.max_new_tokens = max_new_tokens;
            }
        }

        Ok(config)
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "vqa-mix")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Validate the service settings. The API key is checked separately,
    /// when a call actually needs it.
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_base.is_empty() {
            return Err(VqaError::Config(
                "LLM API base URL is required. Set LLM_API_BASE environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.model.is_empty() {
            return Err(VqaError::Config(
                "LLM model is required. Set LLM_MODEL environment variable or add to config file."
                    .to_string(),
            ));
        }

        if self.llm.timeout_secs == 0 {
            return Err(VqaError::Config(
                "LLM timeout must be at least one second.".to_string(),
            ));
        }

        Ok(())
    }

    /// Create a config from explicit values (useful for testing).
    pub fn with_llm(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            llm: LlmConfig {
                api_base: api_base.into(),
                api_key: api_key.into(),
                model: model.into(),
                ..Default::default()
            },
            model: ModelConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.llm.api_base, "https://api.openai.com");
        assert!(config.llm.api_key.is_empty());
        assert_eq!(config.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.max_tokens, 200);
        assert_eq!(config.llm.temperature, 0.7);
        assert_eq!(config.model.max_new_tokens, 150);
        assert!(config.model.quantize);
    }

    #[test]
    fn test_validate_default_passes() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_fails_without_model() {
        let config = Config::with_llm("https://api.example.com", "key", "");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_llm() {
        let config = Config::with_llm("https://api.example.com", "test-key", "gpt-4");
        assert_eq!(config.llm.api_base, "https://api.example.com");
        assert_eq!(config.llm.api_key, "test-key");
        assert_eq!(config.llm.model, "gpt-4");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-openai"),
            ("LLM_MODEL", "gpt-4o-mini"),
            ("LLM_TIMEOUT_SECS", "5"),
            ("VQA_DEVICE", "cpu"),
            ("VQA_QUANTIZE", "false"),
        ]);
        let mut config = Config::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.llm.api_key, "sk-openai");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.timeout_secs, 5);
        assert_eq!(config.model.device, "cpu");
        assert!(!config.model.quantize);
    }

    #[test]
    fn test_explicit_key_beats_named_env_var() {
        let mut config = Config::with_llm("https://api.example.com", "from-file", "gpt-4o");
        config.apply_env(|key| (key == "OPENAI_API_KEY").then(|| "from-env".to_string()));
        assert_eq!(config.llm.api_key, "from-file");
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
llm:
  model: gpt-4o
  api_key_env: MY_KEY
model:
  device: cpu
  max_new_tokens: 20
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.llm.api_key_env, "MY_KEY");
        assert_eq!(config.llm.api_base, "https://api.openai.com");
        assert_eq!(config.model.device, "cpu");
        assert_eq!(config.model.max_new_tokens, 20);
        assert!(config.model.quantize);
    }

    #[test]
    fn test_from_yaml_invalid() {
        assert!(matches!(
            Config::from_yaml("llm: [unclosed"),
            Err(VqaError::Config(_))
        ));
    }
}
