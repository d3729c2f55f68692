use std::io;
use std::path::Path;

use book_core::{ModelError, TokenBudgetError};
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to parse response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),
    #[error("missing API key: set `{0}` or `api_key` in the config")]
    MissingApiKey(String),
    #[error("unexpected http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("io error at `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Budget(#[from] TokenBudgetError),
    #[error("assistant run {run_id} ended with status `{status}`")]
    RunFailed { run_id: String, status: String },
    #[error("assistant run {run_id} still `{status}` after {polls} polls")]
    RunTimedOut {
        run_id: String,
        status: String,
        polls: usize,
    },
    #[error("operation failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: usize,
        #[source]
        source: Box<AdapterError>,
    },
    #[error("API returned an empty response")]
    EmptyResponse,
}

impl AdapterError {
    pub fn retry_exhausted(attempts: usize, source: AdapterError) -> Self {
        AdapterError::RetryExhausted {
            attempts,
            source: Box::new(source),
        }
    }

    pub fn io(path: &Path, source: io::Error) -> Self {
        AdapterError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Whether repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AdapterError::Http(err) => {
                err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
            }
            AdapterError::HttpStatus { status, .. } => {
                *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || status.is_server_error()
            }
            AdapterError::RunTimedOut { .. } | AdapterError::EmptyResponse => true,
            _ => false,
        }
    }
}

impl From<AdapterError> for ModelError {
    fn from(err: AdapterError) -> Self {
        ModelError::new(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> AdapterError {
        AdapterError::HttpStatus {
            status: StatusCode::from_u16(code).unwrap(),
            body: String::new(),
        }
    }

    #[test]
    fn classifies_http_statuses() {
        assert!(status(429).is_transient());
        assert!(status(408).is_transient());
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(401).is_transient());
        assert!(!status(404).is_transient());
    }

    #[test]
    fn configuration_and_budget_errors_are_final() {
        assert!(AdapterError::EmptyResponse.is_transient());
        assert!(!AdapterError::InvalidConfig("x".into()).is_transient());
        assert!(!AdapterError::Budget(TokenBudgetError::ContextExceeded {
            model: "gpt-4".into(),
            input_tokens: 9_000,
            context_window: 8_192,
        })
        .is_transient());
    }
}
