use crate::artifacts::{Artifact, ChapterKind};
use crate::logging::LogLevel;
use crate::model::LanguageModel;

use super::{Step, StepEnv, StepError};

const NAME: &str = "Assemble book";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum AssemblePhase {
    Assemble,
    Done,
}

/// Concatenates title, table of contents and every full chapter into
/// `fullbook.md`. Makes no model requests.
pub struct AssembleBookStep<'a> {
    env: StepEnv<'a>,
    phase: AssemblePhase,
}

impl<'a> AssembleBookStep<'a> {
    pub fn new(env: StepEnv<'a>) -> Self {
        Self {
            env,
            phase: AssemblePhase::Assemble,
        }
    }

    fn assemble(&self) -> Result<String, StepError> {
        let artifacts = self.env.artifacts;
        let title = artifacts.book_title()?;
        let toc = artifacts.read(Artifact::TableOfContents)?;

        let mut book = format!("# {title}\n\n{}\n\n", toc.trim_end());
        for number in artifacts.chapter_numbers(ChapterKind::Full)? {
            self.env
                .log(LogLevel::Debug, format!("Adding chapter {number} to the book."));
            let text = artifacts.read(Artifact::ChapterFull(number))?;
            book.push_str(text.trim_end());
            book.push_str("\n\n");
        }
        Ok(book)
    }
}

impl Step for AssembleBookStep<'_> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_complete(&self) -> bool {
        self.phase == AssemblePhase::Done
    }

    fn advance(&mut self, _model: &dyn LanguageModel) -> Result<(), StepError> {
        if self.is_complete() {
            return Ok(());
        }
        if !self.env.already_produced(NAME, Artifact::FullBook)? {
            let book = self.assemble()?;
            let path = self.env.artifacts.write(Artifact::FullBook, &book)?;
            self.env
                .log(LogLevel::Info, format!("Full book written to {}.", path.display()));
        }
        self.phase = AssemblePhase::Done;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NullLogSink;
    use crate::prompts::PromptRegistry;
    use crate::steps::testing::{book, ScriptedModel, MARS};

    #[test]
    fn chapters_are_ordered_numerically() {
        let (_dir, store) = book(MARS);
        store.write(Artifact::BookTitles, "1. Red Dust\n2. Other").unwrap();
        store.write(Artifact::TableOfContents, "Landing\nStorm\n").unwrap();
        for n in [10, 2, 1] {
            store
                .write(Artifact::ChapterFull(n), &format!("Chapter {n} prose.\n\n"))
                .unwrap();
        }
        let prompts = PromptRegistry::new().unwrap();
        let model = ScriptedModel::new(Vec::<String>::new());

        let mut step = AssembleBookStep::new(StepEnv::new(&store, &prompts, &NullLogSink));
        step.advance(&model).unwrap();

        assert!(step.is_complete());
        assert_eq!(model.calls(), 0);
        assert_eq!(
            store.read(Artifact::FullBook).unwrap(),
            "# Red Dust\n\nLanding\nStorm\n\nChapter 1 prose.\n\nChapter 2 prose.\n\nChapter 10 prose.\n\n"
        );
    }

    #[test]
    fn existing_book_is_left_alone() {
        let (_dir, store) = book(MARS);
        store.write(Artifact::FullBook, "# Finished").unwrap();
        let prompts = PromptRegistry::new().unwrap();
        let model = ScriptedModel::new(Vec::<String>::new());

        let mut step = AssembleBookStep::new(StepEnv::new(&store, &prompts, &NullLogSink));
        step.advance(&model).unwrap();

        assert!(step.is_complete());
        assert_eq!(store.read(Artifact::FullBook).unwrap(), "# Finished");
    }
}
