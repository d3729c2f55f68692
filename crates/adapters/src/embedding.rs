use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{self, HeaderValue};
use serde::Deserialize;

use book_core::{EmbeddingConfig, EmbeddingModel, ModelError};

use crate::base_url::{api_base_url, endpoint, OPENAI_BASE_URL};
use crate::error::AdapterError;
use crate::retry::{call_with_retry, RetryConfig};

pub fn create_embedding_model(
    config: &EmbeddingConfig,
    retry: RetryConfig,
) -> Result<Box<dyn EmbeddingModel>, AdapterError> {
    let api_key = config
        .resolve_api_key()
        .ok_or_else(|| AdapterError::MissingApiKey(config.api_key_env.clone()))?;
    Ok(Box::new(OpenAiEmbeddings::new(
        Some(api_key),
        &config.base_url,
        &config.model_name,
        config.timeout,
        retry,
    )?))
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbeddings {
    client: Client,
    url: String,
    api_key: Option<String>,
    model_name: String,
    retry: RetryConfig,
}

impl OpenAiEmbeddings {
    pub fn new(
        api_key: Option<String>,
        base_url: &str,
        model_name: &str,
        timeout: u64,
        retry: RetryConfig,
    ) -> Result<Self, AdapterError> {
        if model_name.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "embedding model_name must not be empty".to_string(),
            ));
        }

        let base = api_base_url(base_url, OPENAI_BASE_URL);
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout.max(1)))
            .build()?;

        Ok(Self {
            client,
            url: endpoint(&base, "embeddings"),
            api_key,
            model_name: model_name.trim().to_string(),
            retry,
        })
    }

    fn embed_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AdapterError> {
        let mut request = self.client.post(&self.url).header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let payload = serde_json::json!({
            "model": self.model_name,
            "input": texts,
        });
        let response = request.json(&payload).send()?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::HttpStatus { status, body });
        }
        let parsed: EmbeddingResponse = response.json()?;
        parse_embedding_response(parsed, texts.len())
    }
}

impl EmbeddingModel for OpenAiEmbeddings {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        Ok(call_with_retry(|| self.embed_once(texts), &self.retry)?)
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f64>,
}

/// Vectors in input order. Providers may return them out of order, so the
/// `index` field wins over position when present.
fn parse_embedding_response(
    response: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, AdapterError> {
    let mut items: Vec<(usize, Vec<f32>)> = response
        .data
        .into_iter()
        .enumerate()
        .map(|(position, item)| {
            let vector = item.embedding.into_iter().map(|v| v as f32).collect();
            (item.index.unwrap_or(position), vector)
        })
        .collect();
    if items.len() != expected {
        return Err(AdapterError::EmptyResponse);
    }
    items.sort_by_key(|(index, _)| *index);
    Ok(items.into_iter().map(|(_, vector)| vector).collect())
}
