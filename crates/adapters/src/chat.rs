use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{self, HeaderValue};
use serde::{Deserialize, Serialize};

use book_core::{
    Completion, LanguageModel, Message, ModelError, ModelTable, RequestOptions, Role, TokenBudget,
    Transcript,
};

use crate::base_url::endpoint;
use crate::error::AdapterError;
use crate::mirror::Mirror;
use crate::retry::{call_with_retry, RetryConfig};

/// OpenAI-compatible `/chat/completions` backend.
pub struct ChatCompletionsClient {
    client: Client,
    url: String,
    api_key: Option<String>,
    models: ModelTable,
    temperature: Option<f32>,
    retry: RetryConfig,
    mirror: Mirror,
}

impl ChatCompletionsClient {
    pub(crate) fn new(
        base_url: &str,
        api_key: Option<String>,
        models: ModelTable,
        temperature: Option<f32>,
        timeout: u64,
        retry: RetryConfig,
        mirror: Mirror,
    ) -> Result<Self, AdapterError> {
        if base_url.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "base_url must not be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout.max(1)))
            .build()?;

        Ok(Self {
            client,
            url: endpoint(base_url, "chat/completions"),
            api_key,
            models,
            temperature,
            retry,
            mirror,
        })
    }

    fn complete_once(&self, body: &ChatCompletionRequest<'_>) -> Result<ChatReply, AdapterError> {
        let mut request = self.client.post(&self.url).header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.json(body).send()?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::HttpStatus { status, body });
        }
        let parsed: ChatCompletionResponse = response.json()?;
        parse_chat_response(parsed)
    }
}

impl LanguageModel for ChatCompletionsClient {
    fn complete(
        &self,
        transcript: &Transcript,
        options: &RequestOptions,
    ) -> Result<Completion, ModelError> {
        let spec = self.models.select(options.tier, options.context);
        let budget = TokenBudget::for_messages(&spec.name, spec.context_window, transcript.messages())
            .map_err(AdapterError::from)?;
        self.mirror
            .request(&spec.name, transcript.messages(), budget.input_tokens);

        let body = ChatCompletionRequest {
            model: &spec.name,
            messages: transcript
                .messages()
                .iter()
                .map(ChatMessageRequest::from)
                .collect(),
            max_tokens: budget.max_output_tokens,
            temperature: self.temperature,
        };
        let reply = call_with_retry(|| self.complete_once(&body), &self.retry)?;

        self.mirror.answer(&reply.message, budget.input_tokens);
        Ok(Completion::new(reply.message, reply.total_tokens))
    }
}

#[derive(Debug)]
struct ChatReply {
    message: Message,
    total_tokens: u64,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessageRequest<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

impl<'a> From<&'a Message> for ChatMessageRequest<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            role: message.role.as_str(),
            content: &message.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Usage {
    #[serde(default)]
    pub(crate) total_tokens: u64,
}

fn parse_chat_response(response: ChatCompletionResponse) -> Result<ChatReply, AdapterError> {
    let total_tokens = response.usage.map(|usage| usage.total_tokens).unwrap_or(0);
    response
        .choices
        .into_iter()
        .filter_map(|choice| choice.message)
        .find_map(|message| {
            let content = message.content?;
            if content.trim().is_empty() {
                return None;
            }
            Some(Message::new(message.role.unwrap_or(Role::Assistant), content))
        })
        .map(|message| ChatReply {
            message,
            total_tokens,
        })
        .ok_or(AdapterError::EmptyResponse)
}
