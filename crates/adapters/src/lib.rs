mod assistants;
mod base_url;
mod chat;
mod embedding;
mod error;
mod llm;
mod mirror;
mod ollama;
mod retry;

pub use assistants::{
    AssistantRecord, AssistantRegistry, AssistantsClient, AGENTS_FILE_NAME, ASSISTANT_NAME_PREFIX,
};
pub use base_url::{api_base_url, endpoint, ollama_root_url, OPENAI_BASE_URL};
pub use chat::ChatCompletionsClient;
pub use embedding::{create_embedding_model, OpenAiEmbeddings};
pub use error::AdapterError;
pub use llm::{create_language_model, default_base_url, BackendOptions};
pub use ollama::OllamaClient;
pub use retry::{call_with_retry, RetryConfig};

pub use book_core::{EmbeddingModel, LanguageModel, ModelError};
