use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::info;

use book_core::{Backend, LanguageModel, LlmConfig, MessageLog, OUTPUT_DIR_NAME};

use crate::assistants::{AssistantRegistry, AssistantsClient, Polling, AGENTS_FILE_NAME};
use crate::base_url::{api_base_url, OPENAI_BASE_URL};
use crate::chat::ChatCompletionsClient;
use crate::error::AdapterError;
use crate::mirror::Mirror;
use crate::ollama::OllamaClient;
use crate::retry::RetryConfig;

/// Per-run inputs that do not live in the config file.
#[derive(Clone, Debug, Default)]
pub struct BackendOptions {
    /// Overrides the credential resolved from the config.
    pub api_key: Option<String>,
    pub message_log: Option<Arc<MessageLog>>,
    /// Book directory; the assistants registry lives in its `output/`.
    pub book_dir: PathBuf,
}

/// Builds the backend selected by `config.backend`.
///
/// Credentials are checked here so a run fails before its first request.
pub fn create_language_model(
    config: &LlmConfig,
    options: BackendOptions,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let retry = RetryConfig::from_llm_config(config);
    let mirror = Mirror::new(options.message_log);
    let api_key = options.api_key.or_else(|| config.resolve_api_key());

    if config.backend.requires_api_key() && api_key.is_none() {
        return Err(AdapterError::MissingApiKey(config.api_key_env.clone()));
    }

    match config.backend {
        Backend::Chat => {
            let base = api_base_url(&config.base_url, default_base_url(&config.interface_format)?);
            info!("using chat completions at {base}");
            Ok(Box::new(ChatCompletionsClient::new(
                &base,
                api_key,
                config.models.clone(),
                config.temperature,
                config.timeout,
                retry,
                mirror,
            )?))
        }
        Backend::Assistants => {
            let base = api_base_url(&config.base_url, OPENAI_BASE_URL);
            let registry = AssistantRegistry::load(
                options.book_dir.join(OUTPUT_DIR_NAME).join(AGENTS_FILE_NAME),
            )?;
            info!(
                "using assistants API at {base} ({} known assistants)",
                registry.records().len()
            );
            Ok(Box::new(AssistantsClient::new(
                &base,
                api_key.as_deref().unwrap_or_default(),
                config.models.clone(),
                config.temperature,
                config.timeout,
                retry,
                Polling {
                    interval: Duration::from_secs(config.poll_interval_secs),
                    max_polls: config.max_polls,
                },
                registry,
                mirror,
            )?))
        }
        Backend::Local => {
            info!(
                "using local model {} at {}",
                config.local_model, config.local_base_url
            );
            Ok(Box::new(OllamaClient::new(
                &config.local_base_url,
                &config.local_model,
                config.local_context_window,
                config.temperature,
                config.timeout,
                retry,
                mirror,
            )?))
        }
    }
}

/// Default endpoint for each OpenAI-compatible provider flavour.
pub fn default_base_url(interface_format: &str) -> Result<&'static str, AdapterError> {
    match interface_format.trim().to_lowercase().as_str() {
        "" | "openai" => Ok(OPENAI_BASE_URL),
        "deepseek" => Ok("https://api.deepseek.com/v1"),
        "lm studio" | "ml studio" => Ok("http://localhost:1234/v1"),
        "ollama" => Ok("http://localhost:11434/v1"),
        "grok" => Ok("https://api.x.ai/v1"),
        other => Err(AdapterError::InvalidConfig(format!(
            "unknown interface_format: {other}"
        ))),
    }
}
