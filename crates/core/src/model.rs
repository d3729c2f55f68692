use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::message::{Message, Transcript};

#[derive(Debug)]
pub struct ModelError {
    inner: Box<dyn StdError + Send + Sync>,
}

impl ModelError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
        }
    }

    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync> {
        self.inner
    }

    pub fn as_inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.inner.as_ref()
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for ModelError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextSize {
    #[default]
    Standard,
    Long,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    #[default]
    Standard,
    Advanced,
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => f.write_str("standard"),
            Self::Advanced => f.write_str("advanced"),
        }
    }
}

/// Selects which configured model variant serves a request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RequestOptions {
    pub context: ContextSize,
    pub tier: QualityTier,
}

impl RequestOptions {
    pub fn new(tier: QualityTier) -> Self {
        Self {
            context: ContextSize::Standard,
            tier,
        }
    }

    pub fn long(mut self) -> Self {
        self.context = ContextSize::Long;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub message: Message,
    pub total_tokens: u64,
}

impl Completion {
    pub fn new(message: Message, total_tokens: u64) -> Self {
        Self {
            message,
            total_tokens,
        }
    }

    pub fn content(&self) -> &str {
        &self.message.content
    }
}

pub trait LanguageModel: Send + Sync {
    fn complete(
        &self,
        transcript: &Transcript,
        options: &RequestOptions,
    ) -> Result<Completion, ModelError>;
}

impl<M: LanguageModel + ?Sized> LanguageModel for &M {
    fn complete(
        &self,
        transcript: &Transcript,
        options: &RequestOptions,
    ) -> Result<Completion, ModelError> {
        (**self).complete(transcript, options)
    }
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn complete(
        &self,
        transcript: &Transcript,
        options: &RequestOptions,
    ) -> Result<Completion, ModelError> {
        (**self).complete(transcript, options)
    }
}

pub trait EmbeddingModel: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError>;
}

/// Counts calls and provider-reported tokens flowing through a model.
pub struct MeteredModel<'a> {
    inner: &'a dyn LanguageModel,
    requests: AtomicUsize,
    tokens: AtomicU64,
}

impl<'a> MeteredModel<'a> {
    pub fn new(inner: &'a dyn LanguageModel) -> Self {
        Self {
            inner,
            requests: AtomicUsize::new(0),
            tokens: AtomicU64::new(0),
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn total_tokens(&self) -> u64 {
        self.tokens.load(Ordering::Relaxed)
    }
}

impl LanguageModel for MeteredModel<'_> {
    fn complete(
        &self,
        transcript: &Transcript,
        options: &RequestOptions,
    ) -> Result<Completion, ModelError> {
        let completion = self.inner.complete(transcript, options)?;
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.tokens
            .fetch_add(completion.total_tokens, Ordering::Relaxed);
        Ok(completion)
    }
}
