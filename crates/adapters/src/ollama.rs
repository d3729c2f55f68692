use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use book_core::{
    Completion, LanguageModel, Message, ModelError, RequestOptions, Role, TokenBudget, Transcript,
};

use crate::base_url::{endpoint, ollama_root_url};
use crate::error::AdapterError;
use crate::mirror::Mirror;
use crate::retry::{call_with_retry, RetryConfig};

/// Local model served through Ollama's native `/api/chat` endpoint.
///
/// Every tier and context size maps to the same local model.
pub struct OllamaClient {
    client: Client,
    url: String,
    model: String,
    context_window: usize,
    temperature: Option<f32>,
    retry: RetryConfig,
    mirror: Mirror,
}

impl OllamaClient {
    pub(crate) fn new(
        base_url: &str,
        model: &str,
        context_window: usize,
        temperature: Option<f32>,
        timeout: u64,
        retry: RetryConfig,
        mirror: Mirror,
    ) -> Result<Self, AdapterError> {
        let root = ollama_root_url(base_url);
        if root.is_empty() {
            return Err(AdapterError::InvalidConfig(
                "local_base_url must not be empty".to_string(),
            ));
        }
        if model.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "local_model must not be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout.max(1)))
            .build()?;

        Ok(Self {
            client,
            url: endpoint(&root, "api/chat"),
            model: model.trim().to_string(),
            context_window,
            temperature,
            retry,
            mirror,
        })
    }

    fn chat_once(&self, body: &OllamaChatRequest<'_>) -> Result<(Message, u64), AdapterError> {
        let response = self.client.post(&self.url).json(body).send()?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::HttpStatus { status, body });
        }
        let parsed: OllamaChatResponse = response.json()?;
        parse_ollama_response(parsed)
    }
}

impl LanguageModel for OllamaClient {
    fn complete(
        &self,
        transcript: &Transcript,
        _options: &RequestOptions,
    ) -> Result<Completion, ModelError> {
        let budget = TokenBudget::for_messages(&self.model, self.context_window, transcript.messages())
            .map_err(AdapterError::from)?;
        self.mirror
            .request(&self.model, transcript.messages(), budget.input_tokens);

        let body = OllamaChatRequest {
            model: &self.model,
            messages: transcript
                .messages()
                .iter()
                .map(|message| OllamaMessage {
                    role: message.role.as_str(),
                    content: &message.content,
                })
                .collect(),
            stream: false,
            options: OllamaOptions {
                num_predict: budget.max_output_tokens,
                num_ctx: self.context_window,
                temperature: self.temperature,
            },
        };
        let (message, total_tokens) = call_with_retry(|| self.chat_once(&body), &self.retry)?;

        self.mirror.answer(&message, budget.input_tokens);
        Ok(Completion::new(message, total_tokens))
    }
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_predict: u32,
    num_ctx: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaReply>,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Debug, Deserialize)]
struct OllamaReply {
    #[serde(default)]
    content: String,
}

fn parse_ollama_response(response: OllamaChatResponse) -> Result<(Message, u64), AdapterError> {
    let content = response
        .message
        .map(|reply| reply.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or(AdapterError::EmptyResponse)?;
    let total_tokens = response.prompt_eval_count + response.eval_count;
    Ok((Message::new(Role::Assistant, content), total_tokens))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_sums_prompt_and_eval_counts() {
        let raw = r#"{
            "model": "dolphin-mixtral",
            "message": { "role": "assistant", "content": "Chapter 1: Landing" },
            "done": true,
            "prompt_eval_count": 120,
            "eval_count": 30
        }"#;
        let (message, tokens) = parse_ollama_response(serde_json::from_str(raw).unwrap()).unwrap();
        assert_eq!(message, Message::assistant("Chapter 1: Landing"));
        assert_eq!(tokens, 150);
    }

    #[test]
    fn missing_message_is_empty_response() {
        let raw = r#"{ "done": true }"#;
        let error = parse_ollama_response(serde_json::from_str(raw).unwrap()).unwrap_err();
        assert!(matches!(error, AdapterError::EmptyResponse));
    }

    #[test]
    fn rejects_blank_model_name() {
        let result = OllamaClient::new(
            "http://localhost:11434",
            "  ",
            32_768,
            None,
            10,
            RetryConfig::default(),
            Mirror::default(),
        );
        assert!(matches!(result, Err(AdapterError::InvalidConfig(_))));
    }

    #[test]
    fn request_disables_streaming() {
        let body = OllamaChatRequest {
            model: "dolphin-mixtral",
            messages: vec![OllamaMessage {
                role: "user",
                content: "hello",
            }],
            stream: false,
            options: OllamaOptions {
                num_predict: 512,
                num_ctx: 32_768,
                temperature: Some(0.7),
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 512);
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
