mod assemble;
mod chapters;
mod outlines;
mod plot;
mod summaries;
mod title;
mod toc;

pub use assemble::AssembleBookStep;
pub use chapters::FullChaptersStep;
pub use outlines::ChapterOutlinesStep;
pub use plot::{WritePlotStep, PLOT_MARKER};
pub use summaries::ChapterSummariesStep;
pub use title::DetermineTitleStep;
pub use toc::TableOfContentsStep;

use thiserror::Error;

use crate::artifacts::{Artifact, ArtifactError, ArtifactStore};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::message::{Message, Transcript};
use crate::model::{LanguageModel, ModelError, QualityTier, RequestOptions};
use crate::prompts::{PromptError, PromptRegistry};

/// One pipeline stage. Each `advance` performs exactly one phase.
pub trait Step {
    fn name(&self) -> &'static str;

    fn is_complete(&self) -> bool;

    /// Executes the next phase. A complete step ignores further calls.
    fn advance(&mut self, model: &dyn LanguageModel) -> Result<(), StepError>;
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("model request failed during {step}: {source}")]
    Model {
        step: &'static str,
        #[source]
        source: ModelError,
    },
    #[error("{step}: response does not contain the marker `{marker}`")]
    MissingMarker {
        step: &'static str,
        marker: &'static str,
    },
}

/// Shared collaborators handed to every step.
#[derive(Clone, Copy)]
pub struct StepEnv<'a> {
    pub artifacts: &'a ArtifactStore,
    pub prompts: &'a PromptRegistry,
    pub sink: &'a dyn LogSink,
    pub tier: QualityTier,
}

impl<'a> StepEnv<'a> {
    pub fn new(
        artifacts: &'a ArtifactStore,
        prompts: &'a PromptRegistry,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            artifacts,
            prompts,
            sink,
            tier: QualityTier::default(),
        }
    }

    pub fn with_tier(mut self, tier: QualityTier) -> Self {
        self.tier = tier;
        self
    }

    pub(crate) fn options(&self) -> RequestOptions {
        RequestOptions::new(self.tier)
    }

    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }

    pub(crate) fn system_message(&self, key: &str) -> Result<Message, StepError> {
        Ok(Message::system(self.prompts.render_plain(key)?))
    }

    pub(crate) fn user_message<S: AsRef<str>>(
        &self,
        key: &str,
        arguments: &[S],
    ) -> Result<Message, StepError> {
        Ok(Message::user(self.prompts.render(key, arguments)?))
    }

    /// Marks the step done when its single target artifact already exists.
    pub(crate) fn already_produced(
        &self,
        step: &str,
        artifact: Artifact,
    ) -> Result<bool, StepError> {
        if self.artifacts.is_produced(artifact)? {
            self.log(
                LogLevel::Info,
                format!("{artifact} already exists, skipping {step}."),
            );
            return Ok(true);
        }
        Ok(false)
    }

    /// Step-level check for per-chapter steps: every target is already produced.
    /// An empty target list counts as done.
    pub(crate) fn all_produced<I>(&self, step: &str, artifacts: I) -> Result<bool, StepError>
    where
        I: IntoIterator<Item = Artifact>,
    {
        let mut count = 0;
        for artifact in artifacts {
            if !self.artifacts.is_produced(artifact)? {
                return Ok(false);
            }
            count += 1;
        }
        self.log(
            LogLevel::Info,
            format!("All {count} targets already exist, skipping {step}."),
        );
        Ok(true)
    }

    pub(crate) fn request(
        &self,
        step: &'static str,
        model: &dyn LanguageModel,
        transcript: &Transcript,
        options: RequestOptions,
    ) -> Result<Message, StepError> {
        let completion = model
            .complete(transcript, &options)
            .map_err(|source| StepError::Model { step, source })?;
        Ok(completion.message)
    }
}

/// Text following `marker`, trimmed. `None` when the marker is absent.
pub fn extract_content<'t>(content: &'t str, marker: &str) -> Option<&'t str> {
    let start = content.find(marker)?;
    Some(content[start + marker.len()..].trim())
}

/// Non-empty lines, trimmed.
pub(crate) fn content_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_after_marker() {
        let reply = "Step 1: The middle sags.\nStep 2:\n  The astronaut grows potatoes.\n";
        assert_eq!(
            extract_content(reply, "Step 2:"),
            Some("The astronaut grows potatoes.")
        );
        assert_eq!(extract_content("no marker here", "Step 2:"), None);
    }

    #[test]
    fn content_lines_skip_blanks() {
        assert_eq!(
            content_lines("  Arrival \n\n\t\nDust storm\n"),
            vec!["Arrival".to_string(), "Dust storm".to_string()]
        );
    }
}
