use crate::artifacts::Artifact;
use crate::logging::LogLevel;
use crate::message::{Message, Transcript};
use crate::model::LanguageModel;

use super::{Step, StepEnv, StepError};

const NAME: &str = "Table of contents";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TocPhase {
    SystemMessage,
    Draft,
    Review,
    Done,
}

pub struct TableOfContentsStep<'a> {
    env: StepEnv<'a>,
    phase: TocPhase,
    transcript: Transcript,
}

impl<'a> TableOfContentsStep<'a> {
    pub fn new(env: StepEnv<'a>) -> Self {
        Self {
            env,
            phase: TocPhase::SystemMessage,
            transcript: Transcript::new(),
        }
    }
}

impl Step for TableOfContentsStep<'_> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_complete(&self) -> bool {
        self.phase == TocPhase::Done
    }

    fn advance(&mut self, model: &dyn LanguageModel) -> Result<(), StepError> {
        if self.is_complete() {
            return Ok(());
        }
        if self.env.already_produced(NAME, Artifact::TableOfContents)? {
            self.phase = TocPhase::Done;
            return Ok(());
        }

        self.phase = match self.phase {
            TocPhase::SystemMessage => {
                self.transcript
                    .push(self.env.system_message("write_toc_system_message")?);
                TocPhase::Draft
            }
            TocPhase::Draft => {
                self.env
                    .log(LogLevel::Info, "Drafting the table of contents...");
                let title = self.env.artifacts.book_title()?;
                let description = self.env.artifacts.read_description()?;
                self.transcript.push(self.env.user_message(
                    "write_toc_firstdraft",
                    &[title.as_str(), description.trim()],
                )?);
                let reply = self
                    .env
                    .request(NAME, model, &self.transcript, self.env.options())?;
                self.transcript.push(reply);
                TocPhase::Review
            }
            TocPhase::Review => {
                self.env
                    .log(LogLevel::Info, "Reviewing the table of contents...");
                self.transcript.push(Message::user(
                    self.env.prompts.render_plain("write_toc_review_draft")?,
                ));
                let reply = self
                    .env
                    .request(NAME, model, &self.transcript, self.env.options())?;
                self.env
                    .artifacts
                    .write(Artifact::TableOfContents, &reply.content)?;
                self.transcript.push(reply);
                TocPhase::Done
            }
            TocPhase::Done => TocPhase::Done,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactStore;
    use crate::logging::NullLogSink;
    use crate::prompts::PromptRegistry;
    use crate::steps::testing::{book, run_to_completion, ScriptedModel, MARS};
    use std::fs;
    use std::io::Write;

    #[test]
    fn review_answer_becomes_the_toc() {
        let (_dir, store) = book(MARS);
        store.write(Artifact::BookTitles, "1. \"Red Dust\"\n").unwrap();
        let prompts = PromptRegistry::new().unwrap();
        let model = ScriptedModel::new(["Landing\nStorm\nRescue", "Landing\nDust Storm\nRescue"]);

        let mut step = TableOfContentsStep::new(StepEnv::new(&store, &prompts, &NullLogSink));
        run_to_completion(&mut step, &model);

        assert_eq!(model.calls(), 2);
        assert_eq!(
            store.read(Artifact::TableOfContents).unwrap(),
            "Landing\nDust Storm\nRescue"
        );
        let draft_request = &model.requests()[0].0;
        assert!(draft_request[1].content.contains("\"Red Dust\""));
        assert!(draft_request[1].content.contains(MARS));
    }

    #[test]
    fn hand_edited_toc_survives_a_rerun() {
        let (dir, store) = book(MARS);
        store.write(Artifact::BookTitles, "1. \"Red Dust\"\n").unwrap();
        let path = store
            .write(Artifact::TableOfContents, "Landing\nDust Storm\n")
            .unwrap();
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "Rescue").unwrap();
        drop(file);

        let store = ArtifactStore::open(dir.path()).unwrap();
        let prompts = PromptRegistry::new().unwrap();
        let model = ScriptedModel::new(Vec::<String>::new());
        let mut step = TableOfContentsStep::new(StepEnv::new(&store, &prompts, &NullLogSink));
        run_to_completion(&mut step, &model);

        assert_eq!(model.calls(), 0);
        assert_eq!(
            store.read(Artifact::TableOfContents).unwrap(),
            "Landing\nDust Storm\nRescue\n"
        );
    }

    #[test]
    fn missing_titles_surface_as_not_found() {
        let (_dir, store) = book(MARS);
        let prompts = PromptRegistry::new().unwrap();
        let model = ScriptedModel::new(["unused"]);

        let mut step = TableOfContentsStep::new(StepEnv::new(&store, &prompts, &NullLogSink));
        step.advance(&model).unwrap();
        let error = step.advance(&model).unwrap_err();

        match error {
            StepError::Artifact(inner) => assert!(inner.is_not_found()),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(model.calls(), 0);
    }
}
