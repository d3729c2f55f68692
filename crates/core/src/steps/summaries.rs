use crate::artifacts::Artifact;
use crate::logging::LogLevel;
use crate::message::Transcript;
use crate::model::LanguageModel;

use super::{content_lines, Step, StepEnv, StepError};

const NAME: &str = "Chapter summaries";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SummaryPhase {
    SystemMessage,
    Plan,
    Chapter,
    Done,
}

/// Writes `chapter_<N>.txt` for every line of the table of contents.
pub struct ChapterSummariesStep<'a> {
    env: StepEnv<'a>,
    phase: SummaryPhase,
    transcript: Transcript,
    title: String,
    description: String,
    chapter_titles: Vec<String>,
    cursor: usize,
}

impl<'a> ChapterSummariesStep<'a> {
    pub fn new(env: StepEnv<'a>) -> Self {
        Self {
            env,
            phase: SummaryPhase::SystemMessage,
            transcript: Transcript::new(),
            title: String::new(),
            description: String::new(),
            chapter_titles: Vec::new(),
            cursor: 0,
        }
    }

    fn next_phase(&self) -> SummaryPhase {
        if self.cursor < self.chapter_titles.len() {
            SummaryPhase::Chapter
        } else {
            SummaryPhase::Done
        }
    }

    /// One summary per non-empty TOC line. A missing TOC means nothing is done yet.
    fn targets_produced(&self) -> Result<bool, StepError> {
        let toc = match self.env.artifacts.read(Artifact::TableOfContents) {
            Ok(toc) => toc,
            Err(err) if err.is_not_found() => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        let count = content_lines(&toc).len() as u32;
        self.env
            .all_produced(NAME, (1..=count).map(Artifact::ChapterSummary))
    }

    fn write_chapter(&mut self, model: &dyn LanguageModel) -> Result<(), StepError> {
        let number = self.cursor as u32 + 1;
        let total = self.chapter_titles.len();
        let artifact = Artifact::ChapterSummary(number);
        if self.env.artifacts.is_produced(artifact)? {
            self.env.log(
                LogLevel::Info,
                format!("Summary for chapter {number} already exists. Skipping."),
            );
            return Ok(());
        }

        self.env.log(
            LogLevel::Info,
            format!("Writing summary for chapter {number} of {total}..."),
        );
        let mut branch = self.transcript.branch();
        branch.push(self.env.user_message(
            "write_chapter_summary",
            &[
                self.title.as_str(),
                self.description.as_str(),
                self.chapter_titles[self.cursor].as_str(),
            ],
        )?);
        let reply = self
            .env
            .request(NAME, model, &branch, self.env.options())?;
        self.env.artifacts.write(artifact, &reply.content)?;
        Ok(())
    }
}

impl Step for ChapterSummariesStep<'_> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_complete(&self) -> bool {
        self.phase == SummaryPhase::Done
    }

    fn advance(&mut self, model: &dyn LanguageModel) -> Result<(), StepError> {
        if self.is_complete() {
            return Ok(());
        }
        if self.targets_produced()? {
            self.phase = SummaryPhase::Done;
            return Ok(());
        }

        self.phase = match self.phase {
            SummaryPhase::SystemMessage => {
                self.transcript
                    .push(self.env.system_message("write_chaptersummary_system_message")?);
                SummaryPhase::Plan
            }
            SummaryPhase::Plan => {
                self.title = self.env.artifacts.book_title()?;
                self.description = self.env.artifacts.read_description()?.trim().to_string();
                let toc = self.env.artifacts.read(Artifact::TableOfContents)?;
                self.chapter_titles = content_lines(&toc);
                self.cursor = 0;
                self.env.log(
                    LogLevel::Info,
                    format!("{} chapters in the table of contents.", self.chapter_titles.len()),
                );
                self.next_phase()
            }
            SummaryPhase::Chapter => {
                self.write_chapter(model)?;
                self.cursor += 1;
                self.next_phase()
            }
            SummaryPhase::Done => SummaryPhase::Done,
        };
        Ok(())
    }
}
