use crate::artifacts::{Artifact, ChapterKind};
use crate::logging::LogLevel;
use crate::message::Transcript;
use crate::model::LanguageModel;

use super::{Step, StepEnv, StepError};

const NAME: &str = "Chapter outlines";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum OutlinePhase {
    SystemMessage,
    Plan,
    Chapter,
    Done,
}

/// Turns every `chapter_<N>.txt` summary into `chapteroutline_<N>.txt`.
pub struct ChapterOutlinesStep<'a> {
    env: StepEnv<'a>,
    phase: OutlinePhase,
    transcript: Transcript,
    title: String,
    chapters: Vec<u32>,
    cursor: usize,
}

impl<'a> ChapterOutlinesStep<'a> {
    pub fn new(env: StepEnv<'a>) -> Self {
        Self {
            env,
            phase: OutlinePhase::SystemMessage,
            transcript: Transcript::new(),
            title: String::new(),
            chapters: Vec::new(),
            cursor: 0,
        }
    }

    fn next_phase(&self) -> OutlinePhase {
        if self.cursor < self.chapters.len() {
            OutlinePhase::Chapter
        } else {
            OutlinePhase::Done
        }
    }

    fn targets_produced(&self) -> Result<bool, StepError> {
        let summaries = self.env.artifacts.chapter_numbers(ChapterKind::Summary)?;
        self.env
            .all_produced(NAME, summaries.into_iter().map(Artifact::ChapterOutline))
    }

    fn write_outline(&self, model: &dyn LanguageModel) -> Result<(), StepError> {
        let number = self.chapters[self.cursor];
        let artifact = Artifact::ChapterOutline(number);
        if self.env.artifacts.is_produced(artifact)? {
            self.env.log(
                LogLevel::Info,
                format!("Outline for chapter {number} already exists. Skipping."),
            );
            return Ok(());
        }

        self.env.log(
            LogLevel::Info,
            format!(
                "Writing outline for chapter {number} ({}/{})...",
                self.cursor + 1,
                self.chapters.len()
            ),
        );
        let summary = self.env.artifacts.read(Artifact::ChapterSummary(number))?;
        let mut branch = self.transcript.branch();
        branch.push(
            self.env
                .user_message("write_chapteroutline", &[self.title.as_str(), summary.trim()])?,
        );
        let reply = self
            .env
            .request(NAME, model, &branch, self.env.options())?;
        self.env.artifacts.write(artifact, &reply.content)?;
        Ok(())
    }
}

impl Step for ChapterOutlinesStep<'_> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_complete(&self) -> bool {
        self.phase == OutlinePhase::Done
    }

    fn advance(&mut self, model: &dyn LanguageModel) -> Result<(), StepError> {
        if self.is_complete() {
            return Ok(());
        }
        if self.targets_produced()? {
            self.phase = OutlinePhase::Done;
            return Ok(());
        }

        self.phase = match self.phase {
            OutlinePhase::SystemMessage => {
                self.transcript
                    .push(self.env.system_message("write_chapteroutline_system_message")?);
                OutlinePhase::Plan
            }
            OutlinePhase::Plan => {
                self.title = self.env.artifacts.book_title()?;
                self.chapters = self.env.artifacts.chapter_numbers(ChapterKind::Summary)?;
                self.cursor = 0;
                self.next_phase()
            }
            OutlinePhase::Chapter => {
                self.write_outline(model)?;
                self.cursor += 1;
                self.next_phase()
            }
            OutlinePhase::Done => OutlinePhase::Done,
        };
        Ok(())
    }
}
