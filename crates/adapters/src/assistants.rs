use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use log::{debug, info};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use book_core::{
    Completion, LanguageModel, Message, ModelError, ModelTable, RequestOptions, Role, TokenBudget,
    Transcript,
};

use crate::base_url::endpoint;
use crate::error::AdapterError;
use crate::mirror::Mirror;
use crate::retry::{call_with_retry, RetryConfig};

pub const AGENTS_FILE_NAME: &str = "agents.json";
pub const ASSISTANT_NAME_PREFIX: &str = "AIB_";

const BETA_HEADER: &str = "openai-beta";
const BETA_VALUE: &str = "assistants=v2";

/// One assistant created on the provider side.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssistantRecord {
    pub name: String,
    pub id: String,
    pub model: String,
    pub instructions: String,
}

/// Assistants keyed by model and instructions, persisted as JSON so reruns
/// reuse them instead of creating new ones.
#[derive(Debug, Default)]
pub struct AssistantRegistry {
    path: PathBuf,
    records: Vec<AssistantRecord>,
}

#[derive(Serialize, Deserialize, Default)]
struct RegistryFile {
    #[serde(default)]
    assistants: Vec<AssistantRecord>,
}

impl AssistantRegistry {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, AdapterError> {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => Vec::new(),
            Ok(raw) => serde_json::from_str::<RegistryFile>(&raw)?.assistants,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(AdapterError::io(&path, err)),
        };
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[AssistantRecord] {
        &self.records
    }

    pub fn find(&self, model: &str, instructions: &str) -> Option<&AssistantRecord> {
        self.records
            .iter()
            .find(|record| record.model == model && record.instructions == instructions)
    }

    /// Name for the next assistant: the prefix plus a running number.
    pub fn next_name(&self) -> String {
        format!("{ASSISTANT_NAME_PREFIX}{}", self.records.len() + 1)
    }

    pub fn insert(&mut self, record: AssistantRecord) -> Result<(), AdapterError> {
        self.records.push(record);
        self.save()
    }

    fn save(&self) -> Result<(), AdapterError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| AdapterError::io(parent, err))?;
        }
        let file = RegistryFile {
            assistants: self.records.clone(),
        };
        let raw = serde_json::to_string_pretty(&file)?;
        fs::write(&self.path, raw).map_err(|err| AdapterError::io(&self.path, err))
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Polling {
    pub(crate) interval: Duration,
    pub(crate) max_polls: usize,
}

/// Stateful assistants API: one thread and one run per request.
pub struct AssistantsClient {
    client: Client,
    base_url: String,
    models: ModelTable,
    temperature: Option<f32>,
    retry: RetryConfig,
    polling: Polling,
    registry: Mutex<AssistantRegistry>,
    mirror: Mirror,
}

impl AssistantsClient {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        base_url: &str,
        api_key: &str,
        models: ModelTable,
        temperature: Option<f32>,
        timeout: u64,
        retry: RetryConfig,
        polling: Polling,
        registry: AssistantRegistry,
        mirror: Mirror,
    ) -> Result<Self, AdapterError> {
        if base_url.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "base_url must not be empty".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|err| AdapterError::InvalidConfig(format!("invalid api key: {err}")))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(BETA_HEADER, HeaderValue::from_static(BETA_VALUE));

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout.max(1)))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            models,
            temperature,
            retry,
            polling,
            registry: Mutex::new(registry),
            mirror,
        })
    }

    fn url(&self, path: &str) -> String {
        endpoint(&self.base_url, path)
    }

    fn assistant_for(&self, model: &str, instructions: &str) -> Result<String, AdapterError> {
        let mut registry = self
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(record) = registry.find(model, instructions) {
            return Ok(record.id.clone());
        }

        let name = registry.next_name();
        let body = json!({
            "name": name,
            "model": model,
            "instructions": instructions,
            "temperature": self.temperature,
        });
        let created: IdObject = call_with_retry(
            || send_json(self.client.post(self.url("assistants")).json(&body)),
            &self.retry,
        )?;
        info!("created assistant {name} ({}) for {model}", created.id);

        let id = created.id.clone();
        registry.insert(AssistantRecord {
            name,
            id: created.id,
            model: model.to_string(),
            instructions: instructions.to_string(),
        })?;
        Ok(id)
    }

    fn run_once(
        &self,
        assistant_id: &str,
        transcript: &Transcript,
        max_tokens: u32,
    ) -> Result<(Message, u64), AdapterError> {
        let thread: IdObject = send_json(
            self.client
                .post(self.url("threads"))
                .json(&thread_body(transcript)),
        )?;

        let run: RunObject = send_json(
            self.client
                .post(self.url(&format!("threads/{}/runs", thread.id)))
                .json(&json!({
                    "assistant_id": assistant_id,
                    "max_completion_tokens": max_tokens,
                })),
        )?;
        let run = self.wait_for_run(&thread.id, run)?;
        let total_tokens = run.usage.map(|usage| usage.total_tokens).unwrap_or(0);

        let messages: MessageList = send_json(self.client.get(self.url(&format!(
            "threads/{}/messages?order=desc&limit=1",
            thread.id
        ))))?;
        let message = latest_assistant_message(messages)?;
        Ok((message, total_tokens))
    }

    fn wait_for_run(&self, thread_id: &str, mut run: RunObject) -> Result<RunObject, AdapterError> {
        let mut polls = 0;
        loop {
            match run_state(&run.status) {
                RunState::Completed => return Ok(run),
                RunState::Failed => {
                    return Err(AdapterError::RunFailed {
                        run_id: run.id,
                        status: run.status,
                    })
                }
                RunState::Pending if polls >= self.polling.max_polls => {
                    return Err(AdapterError::RunTimedOut {
                        run_id: run.id,
                        status: run.status,
                        polls,
                    })
                }
                RunState::Pending => {
                    debug!("run {} is {}, waiting", run.id, run.status);
                    thread::sleep(self.polling.interval);
                    polls += 1;
                    run = send_json(
                        self.client
                            .get(self.url(&format!("threads/{thread_id}/runs/{}", run.id))),
                    )?;
                }
            }
        }
    }
}

impl LanguageModel for AssistantsClient {
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

        let instructions = transcript.system_prompt().unwrap_or_default();
        let assistant_id = self.assistant_for(&spec.name, &instructions)?;
        let (message, total_tokens) = call_with_retry(
            || self.run_once(&assistant_id, transcript, budget.max_output_tokens),
            &self.retry,
        )?;

        self.mirror.answer(&message, budget.input_tokens);
        Ok(Completion::new(message, total_tokens))
    }
}

fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, AdapterError> {
    let response = request.send()?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        return Err(AdapterError::HttpStatus { status, body });
    }
    Ok(response.json()?)
}

/// Thread payload with the conversation so far. System messages travel as
/// assistant instructions instead.
fn thread_body(transcript: &Transcript) -> serde_json::Value {
    let messages: Vec<_> = transcript
        .messages()
        .iter()
        .filter(|message| message.role != Role::System)
        .map(|message| {
            json!({
                "role": message.role.as_str(),
                "content": message.content,
            })
        })
        .collect();
    json!({ "messages": messages })
}

#[derive(Debug, PartialEq, Eq)]
enum RunState {
    Pending,
    Completed,
    Failed,
}

fn run_state(status: &str) -> RunState {
    match status {
        "completed" => RunState::Completed,
        "queued" | "in_progress" | "cancelling" => RunState::Pending,
        _ => RunState::Failed,
    }
}

#[derive(Debug, Deserialize)]
struct IdObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    status: String,
    #[serde(default)]
    usage: Option<crate::chat::Usage>,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    data: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    role: Role,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<TextPart>,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    value: String,
}

fn latest_assistant_message(list: MessageList) -> Result<Message, AdapterError> {
    let message = list
        .data
        .into_iter()
        .find(|message| message.role == Role::Assistant)
        .ok_or(AdapterError::EmptyResponse)?;
    let text = message
        .content
        .into_iter()
        .filter_map(|part| part.text.map(|text| text.value))
        .collect::<Vec<_>>()
        .join("\n");
    if text.trim().is_empty() {
        return Err(AdapterError::EmptyResponse);
    }
    Ok(Message::assistant(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(name: &str, id: &str, instructions: &str) -> AssistantRecord {
        AssistantRecord {
            name: name.into(),
            id: id.into(),
            model: "gpt-4".into(),
            instructions: instructions.into(),
        }
    }

    #[test]
    fn registry_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("output").join(AGENTS_FILE_NAME);

        let mut registry = AssistantRegistry::load(&path).unwrap();
        assert!(registry.records().is_empty());
        assert_eq!(registry.next_name(), "AIB_1");
        registry
            .insert(record("AIB_1", "asst_123", "You write tables of contents."))
            .unwrap();

        let reloaded = AssistantRegistry::load(&path).unwrap();
        assert_eq!(reloaded.next_name(), "AIB_2");
        let found = reloaded
            .find("gpt-4", "You write tables of contents.")
            .unwrap();
        assert_eq!(found.id, "asst_123");
        assert!(reloaded.find("gpt-4-32k", "You write tables of contents.").is_none());
        assert!(reloaded.find("gpt-4", "other persona").is_none());
    }

    #[test]
    fn thread_body_skips_system_messages() {
        let mut transcript = Transcript::new();
        transcript.push(Message::system("persona"));
        transcript.push(Message::user("question"));
        transcript.push(Message::assistant("answer"));
        transcript.push(Message::user("follow up"));

        let body = thread_body(&transcript);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[2]["content"], "follow up");
    }

    #[test]
    fn classifies_run_statuses() {
        assert_eq!(run_state("queued"), RunState::Pending);
        assert_eq!(run_state("in_progress"), RunState::Pending);
        assert_eq!(run_state("completed"), RunState::Completed);
        assert_eq!(run_state("failed"), RunState::Failed);
        assert_eq!(run_state("expired"), RunState::Failed);
        assert_eq!(run_state("requires_action"), RunState::Failed);
    }

    #[test]
    fn extracts_latest_assistant_text() {
        let raw = r#"{
            "object": "list",
            "data": [{
                "id": "msg_1",
                "role": "assistant",
                "content": [
                    { "type": "text", "text": { "value": "1. Arrival", "annotations": [] } },
                    { "type": "text", "text": { "value": "2. Storm", "annotations": [] } }
                ]
            }]
        }"#;
        let message = latest_assistant_message(serde_json::from_str(raw).unwrap()).unwrap();
        assert_eq!(message, Message::assistant("1. Arrival\n2. Storm"));
    }

    #[test]
    fn user_only_listing_is_empty_response() {
        let raw = r#"{ "data": [{ "role": "user", "content": [] }] }"#;
        let error = latest_assistant_message(serde_json::from_str(raw).unwrap()).unwrap_err();
        assert!(matches!(error, AdapterError::EmptyResponse));
    }
}
