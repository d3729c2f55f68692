use crate::artifacts::Artifact;
use crate::logging::LogLevel;
use crate::message::{Message, Transcript};
use crate::model::LanguageModel;

use super::{Step, StepEnv, StepError};

const NAME: &str = "Determine title";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TitlePhase {
    SystemMessage,
    Propose,
    Rank,
    Done,
}

/// Proposes titles for the description, then has the model rank them.
/// The ranked list becomes `book_titles.txt`.
pub struct DetermineTitleStep<'a> {
    env: StepEnv<'a>,
    phase: TitlePhase,
    transcript: Transcript,
}

impl<'a> DetermineTitleStep<'a> {
    pub fn new(env: StepEnv<'a>) -> Self {
        Self {
            env,
            phase: TitlePhase::SystemMessage,
            transcript: Transcript::new(),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }
}

impl Step for DetermineTitleStep<'_> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_complete(&self) -> bool {
        self.phase == TitlePhase::Done
    }

    fn advance(&mut self, model: &dyn LanguageModel) -> Result<(), StepError> {
        if self.is_complete() {
            return Ok(());
        }
        if self.env.already_produced(NAME, Artifact::BookTitles)? {
            self.phase = TitlePhase::Done;
            return Ok(());
        }

        self.phase = match self.phase {
            TitlePhase::SystemMessage => {
                self.transcript
                    .push(self.env.system_message("find_book_title_system_message")?);
                TitlePhase::Propose
            }
            TitlePhase::Propose => {
                self.env.log(LogLevel::Info, "Suggesting book titles...");
                let description = self.env.artifacts.read_description()?;
                self.transcript.push(
                    self.env
                        .user_message("find_book_description_prompt", &[description.trim()])?,
                );
                let reply = self
                    .env
                    .request(NAME, model, &self.transcript, self.env.options())?;
                self.transcript.push(reply);
                TitlePhase::Rank
            }
            TitlePhase::Rank => {
                self.env.log(LogLevel::Info, "Ranking book titles...");
                self.transcript.push(Message::user(
                    self.env.prompts.render_plain("rank_book_titles")?,
                ));
                let reply = self
                    .env
                    .request(NAME, model, &self.transcript, self.env.options())?;
                let path = self.env.artifacts.write(Artifact::BookTitles, &reply.content)?;
                self.transcript.push(reply);
                self.env
                    .log(LogLevel::Info, format!("Book titles written to {}.", path.display()));
                TitlePhase::Done
            }
            TitlePhase::Done => TitlePhase::Done,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::VecLogSink;
    use crate::message::Role;
    use crate::prompts::PromptRegistry;
    use crate::steps::testing::{book, run_to_completion, ScriptedModel, MARS};
    use std::fs;

    #[test]
    fn mars_description_takes_two_requests_and_one_file() {
        let (_dir, store) = book(MARS);
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let env = StepEnv::new(&store, &prompts, &sink);
        let model = ScriptedModel::new([
            "Red Dust\nAlone on Ares\nThe Martian Garden",
            "1. Alone on Ares\n2. Red Dust\n3. The Martian Garden",
        ]);

        let mut step = DetermineTitleStep::new(env);
        let advances = run_to_completion(&mut step, &model);

        assert_eq!(advances, 3);
        assert_eq!(model.calls(), 2);
        let produced: Vec<String> = fs::read_dir(store.output_dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name != crate::artifacts::MANIFEST_FILE_NAME)
            .collect();
        assert_eq!(produced, vec!["book_titles.txt".to_string()]);
        assert_eq!(store.book_title().unwrap(), "Alone on Ares");

        let requests = model.requests();
        let first = &requests[0].0;
        assert_eq!(first[0].role, Role::System);
        assert!(first[1].content.contains(MARS));
        // The ranking request replays the proposal.
        assert_eq!(requests[1].0.len(), 4);
        assert_eq!(requests[1].0[2].role, Role::Assistant);
    }

    #[test]
    fn existing_titles_skip_without_model() {
        let (_dir, store) = book(MARS);
        store.write(Artifact::BookTitles, "1. Red Dust\n").unwrap();
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let model = ScriptedModel::new(Vec::<String>::new());

        let mut step = DetermineTitleStep::new(StepEnv::new(&store, &prompts, &sink));
        step.advance(&model).unwrap();

        assert!(step.is_complete());
        assert_eq!(model.calls(), 0);
        assert!(step.transcript().is_empty());
        assert!(sink.contains("skipping Determine title"));

        step.advance(&model).unwrap();
        assert_eq!(model.calls(), 0);
    }
}
