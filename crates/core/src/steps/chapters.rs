use crate::artifacts::{Artifact, ArtifactWriter, ChapterKind};
use crate::logging::LogLevel;
use crate::message::Transcript;
use crate::model::LanguageModel;

use super::{content_lines, Step, StepEnv, StepError};

const NAME: &str = "Full chapters";
const PARAGRAPH_BREAK: &str = "\n\n";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ChapterPhase {
    SystemMessage,
    Plan,
    Open,
    Line,
    Commit,
    Done,
}

/// The chapter currently being written. Its branch accumulates every line
/// prompt and answer so the model sees the running chapter text.
struct OpenChapter<'a> {
    number: u32,
    lines: Vec<String>,
    next_line: usize,
    branch: Transcript,
    writer: ArtifactWriter<'a>,
}

/// Writes `chapterfull_<N>.txt` one outline line at a time.
pub struct FullChaptersStep<'a> {
    env: StepEnv<'a>,
    phase: ChapterPhase,
    transcript: Transcript,
    chapters: Vec<u32>,
    cursor: usize,
    current: Option<OpenChapter<'a>>,
}

impl<'a> FullChaptersStep<'a> {
    pub fn new(env: StepEnv<'a>) -> Self {
        Self {
            env,
            phase: ChapterPhase::SystemMessage,
            transcript: Transcript::new(),
            chapters: Vec::new(),
            cursor: 0,
            current: None,
        }
    }

    fn after_chapter(&self) -> ChapterPhase {
        if self.cursor < self.chapters.len() {
            ChapterPhase::Open
        } else {
            ChapterPhase::Done
        }
    }

    fn targets_produced(&self) -> Result<bool, StepError> {
        let outlines = self.env.artifacts.chapter_numbers(ChapterKind::Outline)?;
        self.env
            .all_produced(NAME, outlines.into_iter().map(Artifact::ChapterFull))
    }

    fn open_chapter(&mut self) -> Result<ChapterPhase, StepError> {
        let artifacts = self.env.artifacts;
        let number = self.chapters[self.cursor];
        let artifact = Artifact::ChapterFull(number);
        if artifacts.is_produced(artifact)? {
            self.env.log(
                LogLevel::Info,
                format!("Chapter {number} already exists. Skipping."),
            );
            self.cursor += 1;
            return Ok(self.after_chapter());
        }

        self.env.log(
            LogLevel::Info,
            format!(
                "Working on chapter {number} ({}/{})...",
                self.cursor + 1,
                self.chapters.len()
            ),
        );
        let summary = artifacts.read(Artifact::ChapterSummary(number))?;
        let outline = artifacts.read(Artifact::ChapterOutline(number))?;
        let lines = content_lines(&outline);

        let mut branch = self.transcript.branch();
        branch.push(
            self.env
                .user_message("write_chapter", &[summary.trim(), outline.trim()])?,
        );
        let writer = artifacts.begin(artifact)?;

        let next = if lines.is_empty() {
            ChapterPhase::Commit
        } else {
            ChapterPhase::Line
        };
        self.current = Some(OpenChapter {
            number,
            lines,
            next_line: 0,
            branch,
            writer,
        });
        Ok(next)
    }

    fn write_line(&mut self, model: &dyn LanguageModel) -> Result<ChapterPhase, StepError> {
        let env = self.env;
        let Some(chapter) = self.current.as_mut() else {
            return Ok(ChapterPhase::Open);
        };

        let line = &chapter.lines[chapter.next_line];
        env.log(
            LogLevel::Debug,
            format!(
                "Chapter {}: outline line {}/{}",
                chapter.number,
                chapter.next_line + 1,
                chapter.lines.len()
            ),
        );
        chapter
            .branch
            .push(env.user_message("write_chapter_line", &[line.as_str()])?);
        let reply = env.request(NAME, model, &chapter.branch, env.options().long())?;
        chapter.writer.append(&reply.content)?;
        chapter.writer.append(PARAGRAPH_BREAK)?;
        chapter.branch.push(reply);
        chapter.next_line += 1;

        Ok(if chapter.next_line < chapter.lines.len() {
            ChapterPhase::Line
        } else {
            ChapterPhase::Commit
        })
    }

    fn commit_chapter(&mut self) -> Result<ChapterPhase, StepError> {
        if let Some(chapter) = self.current.take() {
            let path = chapter.writer.commit()?;
            self.env.log(
                LogLevel::Info,
                format!("Chapter {} written to {}.", chapter.number, path.display()),
            );
        }
        self.cursor += 1;
        Ok(self.after_chapter())
    }
}

impl Step for FullChaptersStep<'_> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_complete(&self) -> bool {
        self.phase == ChapterPhase::Done
    }

    fn advance(&mut self, model: &dyn LanguageModel) -> Result<(), StepError> {
        if self.is_complete() {
            return Ok(());
        }
        if self.current.is_none() && self.targets_produced()? {
            self.phase = ChapterPhase::Done;
            return Ok(());
        }

        self.phase = match self.phase {
            ChapterPhase::SystemMessage => {
                self.transcript
                    .push(self.env.system_message("write_chapters_system_message")?);
                ChapterPhase::Plan
            }
            ChapterPhase::Plan => {
                self.chapters = self.env.artifacts.chapter_numbers(ChapterKind::Outline)?;
                self.cursor = 0;
                self.after_chapter()
            }
            ChapterPhase::Open => self.open_chapter()?,
            ChapterPhase::Line => self.write_line(model)?,
            ChapterPhase::Commit => self.commit_chapter()?,
            ChapterPhase::Done => ChapterPhase::Done,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NullLogSink;
    use crate::message::Role;
    use crate::model::ContextSize;
    use crate::prompts::PromptRegistry;
    use crate::steps::testing::{book, run_to_completion, ScriptedModel, MARS};
    use std::fs;

    #[test]
    fn writes_one_answer_per_outline_line() {
        let (_dir, store) = book(MARS);
        store.write(Artifact::ChapterSummary(1), "The landing.").unwrap();
        store
            .write(Artifact::ChapterOutline(1), "Touchdown\n\nDust everywhere\n")
            .unwrap();
        let prompts = PromptRegistry::new().unwrap();
        let model = ScriptedModel::new(["The lander hit the ground.", "Dust rose."]);

        let mut step = FullChaptersStep::new(StepEnv::new(&store, &prompts, &NullLogSink));
        run_to_completion(&mut step, &model);

        assert_eq!(
            store.read(Artifact::ChapterFull(1)).unwrap(),
            "The lander hit the ground.\n\nDust rose.\n\n"
        );
        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests
            .iter()
            .all(|(_, options)| options.context == ContextSize::Long));
        // system, chapter context, line 1 prompt
        assert_eq!(requests[0].0.len(), 3);
        // ... plus line 1 answer and line 2 prompt
        assert_eq!(requests[1].0.len(), 5);
        assert_eq!(requests[1].0[3].role, Role::Assistant);
        assert!(requests[1].0[4].content.contains("Dust everywhere"));
    }

    #[test]
    fn chapters_do_not_share_context() {
        let (_dir, store) = book(MARS);
        for n in [1, 2] {
            store
                .write(Artifact::ChapterSummary(n), &format!("summary {n}"))
                .unwrap();
            store
                .write(Artifact::ChapterOutline(n), &format!("beat {n}"))
                .unwrap();
        }
        let prompts = PromptRegistry::new().unwrap();
        let model = ScriptedModel::new(["one", "two"]);

        let mut step = FullChaptersStep::new(StepEnv::new(&store, &prompts, &NullLogSink));
        run_to_completion(&mut step, &model);

        let second = &model.requests()[1].0;
        assert_eq!(second.len(), 3);
        assert!(second[1].content.contains("summary 2"));
    }

    #[test]
    fn interrupted_chapter_leaves_no_final_file() {
        let (_dir, store) = book(MARS);
        store.write(Artifact::ChapterSummary(1), "summary").unwrap();
        store
            .write(Artifact::ChapterOutline(1), "first\nsecond")
            .unwrap();
        let prompts = PromptRegistry::new().unwrap();
        let model = ScriptedModel::new(["only one answer"]);

        let mut step = FullChaptersStep::new(StepEnv::new(&store, &prompts, &NullLogSink));
        let mut outcome = Ok(());
        while !step.is_complete() && outcome.is_ok() {
            outcome = step.advance(&model);
        }

        assert!(matches!(outcome, Err(StepError::Model { .. })));
        let final_path = store.path(Artifact::ChapterFull(1));
        assert!(!final_path.exists());
        let partial = store.output_dir().join("chapterfull_1.txt.partial");
        assert_eq!(fs::read_to_string(partial).unwrap(), "only one answer\n\n");
        assert!(!store.is_produced(Artifact::ChapterFull(1)).unwrap());
    }

    #[test]
    fn finished_chapters_are_skipped() {
        let (_dir, store) = book(MARS);
        for n in [1, 2] {
            store
                .write(Artifact::ChapterSummary(n), &format!("summary {n}"))
                .unwrap();
            store
                .write(Artifact::ChapterOutline(n), &format!("beat {n}"))
                .unwrap();
        }
        store.write(Artifact::ChapterFull(1), "existing prose").unwrap();
        let before = fs::read(store.path(Artifact::ChapterFull(1))).unwrap();
        let prompts = PromptRegistry::new().unwrap();
        let model = ScriptedModel::new(["fresh prose"]);

        let mut step = FullChaptersStep::new(StepEnv::new(&store, &prompts, &NullLogSink));
        run_to_completion(&mut step, &model);

        assert_eq!(model.calls(), 1);
        assert_eq!(fs::read(store.path(Artifact::ChapterFull(1))).unwrap(), before);
        assert_eq!(
            store.read(Artifact::ChapterFull(2)).unwrap(),
            "fresh prose\n\n"
        );
    }

    #[test]
    fn finished_chapters_complete_in_one_advance() {
        let (_dir, store) = book(MARS);
        for n in [1, 2] {
            store
                .write(Artifact::ChapterOutline(n), &format!("beat {n}"))
                .unwrap();
            store
                .write(Artifact::ChapterFull(n), &format!("prose {n}"))
                .unwrap();
        }
        let prompts = PromptRegistry::new().unwrap();
        let model = ScriptedModel::new(Vec::<String>::new());

        let mut step = FullChaptersStep::new(StepEnv::new(&store, &prompts, &NullLogSink));
        step.advance(&model).unwrap();

        assert!(step.is_complete());
        assert_eq!(model.calls(), 0);
    }
}
