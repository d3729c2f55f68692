use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::{ContextSize, QualityTier};

pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const DEFAULT_PROMPT_DIR: &str = "prompt_templates";
pub const DEFAULT_LOCAL_MODEL: &str = "dolphin-mixtral";

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_interface_format() -> String {
    "openai".to_string()
}

fn default_timeout() -> u64 {
    600
}

fn default_max_retries() -> usize {
    5
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_max_polls() -> usize {
    20
}

fn default_local_model() -> String {
    DEFAULT_LOCAL_MODEL.to_string()
}

fn default_local_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_local_context_window() -> usize {
    32_768
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}

fn default_prompt_directories() -> Vec<PathBuf> {
    vec![PathBuf::from(DEFAULT_PROMPT_DIR)]
}

fn default_refine_rounds() -> u32 {
    5
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// OpenAI-compatible chat completions.
    #[default]
    Chat,
    /// Stateful assistants API with threads and runs.
    Assistants,
    /// Local Ollama server.
    Local,
}

impl Backend {
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Local)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub context_window: usize,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, context_window: usize) -> Self {
        Self {
            name: name.into(),
            context_window,
        }
    }
}

/// Model used for each combination of tier and context size.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelTable {
    pub standard: ModelSpec,
    pub standard_long: ModelSpec,
    pub advanced: ModelSpec,
    pub advanced_long: ModelSpec,
}

impl Default for ModelTable {
    fn default() -> Self {
        Self {
            standard: ModelSpec::new("gpt-3.5-turbo-16k", 16_384),
            standard_long: ModelSpec::new("gpt-3.5-turbo-16k", 16_384),
            advanced: ModelSpec::new("gpt-4", 8_192),
            advanced_long: ModelSpec::new("gpt-4-32k", 32_768),
        }
    }
}

impl ModelTable {
    /// Every variant served by the same model.
    pub fn uniform(spec: ModelSpec) -> Self {
        Self {
            standard: spec.clone(),
            standard_long: spec.clone(),
            advanced: spec.clone(),
            advanced_long: spec,
        }
    }

    pub fn select(&self, tier: QualityTier, context: ContextSize) -> &ModelSpec {
        match (tier, context) {
            (QualityTier::Standard, ContextSize::Standard) => &self.standard,
            (QualityTier::Standard, ContextSize::Long) => &self.standard_long,
            (QualityTier::Advanced, ContextSize::Standard) => &self.advanced,
            (QualityTier::Advanced, ContextSize::Long) => &self.advanced_long,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    #[serde(default)]
    pub backend: Backend,
    /// Provider flavour for the chat backend (`openai`, `deepseek`, `lm studio`, ...).
    #[serde(default = "default_interface_format")]
    pub interface_format: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub models: ModelTable,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: usize,
    /// Ollama model served by the `local` backend.
    #[serde(default = "default_local_model")]
    pub local_model: String,
    #[serde(default = "default_local_base_url")]
    pub local_base_url: String,
    #[serde(default = "default_local_context_window")]
    pub local_context_window: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            interface_format: default_interface_format(),
            api_key: String::new(),
            api_key_env: default_api_key_env(),
            base_url: String::new(),
            models: ModelTable::default(),
            temperature: None,
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            max_polls: default_max_polls(),
            local_model: default_local_model(),
            local_base_url: default_local_base_url(),
            local_context_window: default_local_context_window(),
        }
    }
}

impl LlmConfig {
    /// Credential from the config, falling back to the configured environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        let explicit = self.api_key.trim();
        if !explicit.is_empty() {
            return Some(explicit.to_string());
        }
        std::env::var(&self.api_key_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model_name: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_key_env: default_api_key_env(),
            base_url: String::new(),
            model_name: default_embedding_model(),
            timeout: default_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        let explicit = self.api_key.trim();
        if !explicit.is_empty() {
            return Some(explicit.to_string());
        }
        std::env::var(&self.api_key_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptConfig {
    #[serde(default = "default_prompt_directories")]
    pub directories: Vec<PathBuf>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            directories: default_prompt_directories(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub tier: QualityTier,
    #[serde(default)]
    pub include_plot: bool,
    #[serde(default = "default_refine_rounds")]
    pub plot_refine_rounds: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tier: QualityTier::default(),
            include_plot: false,
            plot_refine_rounds: default_refine_rounds(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(input)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    /// Reads `path` when it exists, otherwise returns defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_path(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }
}
