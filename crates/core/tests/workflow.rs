use std::collections::VecDeque;
use std::fs;
use std::io;
use std::sync::Mutex;

use book_core::{
    Artifact, ArtifactStore, ChapterKind, Completion, LanguageModel, Message, ModelError,
    PipelineConfig, PipelineRunner, ProjectStatus, PromptRegistry, RequestOptions, StepEnv,
    Transcript, VecLogSink, DESCRIPTION_FILE_NAME,
};
use tempfile::tempdir;

struct MockLanguageModel {
    responses: Mutex<VecDeque<String>>,
    calls: Mutex<usize>,
}

impl MockLanguageModel {
    fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            calls: Mutex::new(0),
        }
    }

    fn calls(&self) -> usize {
        *self.calls.lock().expect("mock mutex poisoned")
    }

    fn assert_empty(&self) {
        let guard = self.responses.lock().expect("mock mutex poisoned");
        assert!(
            guard.is_empty(),
            "expected all mock responses to be consumed"
        );
    }
}

impl LanguageModel for MockLanguageModel {
    fn complete(
        &self,
        _transcript: &Transcript,
        _options: &RequestOptions,
    ) -> Result<Completion, ModelError> {
        *self.calls.lock().expect("mock mutex poisoned") += 1;
        let mut guard = self.responses.lock().expect("mock mutex poisoned");
        guard
            .pop_front()
            .map(|text| Completion::new(Message::assistant(text), 100))
            .ok_or_else(|| {
                ModelError::new(io::Error::new(
                    io::ErrorKind::Other,
                    "mock language model has no remaining responses",
                ))
            })
    }
}

const FULL_RUN: [&str; 12] = [
    // title
    "Red Dust\nAlone on Ares",
    "1. Red Dust\n2. Alone on Ares",
    // table of contents
    "Landing\nStorm",
    "Touchdown\nThe Storm",
    // summaries
    "Summary of the landing.",
    "Summary of the storm.",
    // outlines
    "Engines cut out\nThe hatch opens",
    "Wind rises\n\nShelter holds",
    // chapter 1
    "The engines died.",
    "The hatch swung open.",
    // chapter 2
    "The wind rose.",
    "The shelter held.",
];

#[test]
fn full_pipeline_produces_expected_artifacts() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    fs::write(
        temp.path().join(DESCRIPTION_FILE_NAME),
        "A lone astronaut stranded on Mars.",
    )?;

    let store = ArtifactStore::open(temp.path())?;
    let prompts = PromptRegistry::new()?;
    let sink = VecLogSink::new();
    let env = StepEnv::new(&store, &prompts, &sink);
    let model = MockLanguageModel::new(FULL_RUN);

    let mut runner = PipelineRunner::for_book(env, &PipelineConfig::default())?;
    let report = runner.run(&model)?;
    report.write_summary(&store)?;

    model.assert_empty();
    assert_eq!(report.steps.len(), 6);
    assert_eq!(report.requests, 12);
    assert_eq!(report.total_tokens, 1_200);

    assert_eq!(store.book_title()?, "Red Dust");
    assert_eq!(store.read(Artifact::TableOfContents)?, "Touchdown\nThe Storm");
    assert_eq!(store.chapter_numbers(ChapterKind::Summary)?, vec![1, 2]);
    assert_eq!(store.chapter_numbers(ChapterKind::Outline)?, vec![1, 2]);
    assert_eq!(
        store.read(Artifact::ChapterFull(2))?,
        "The wind rose.\n\nThe shelter held.\n\n"
    );

    let book = store.read(Artifact::FullBook)?;
    assert!(book.starts_with("# Red Dust\n\nTouchdown\nThe Storm\n\n"));
    let first = book.find("The engines died.").expect("chapter 1 in book");
    let second = book.find("The wind rose.").expect("chapter 2 in book");
    assert!(first < second);

    let summary = store.read(Artifact::RunSummary)?;
    assert!(summary.starts_with("Total tokens used: 1200\n"));

    let status = ProjectStatus::load_or_init(store.output_dir())?;
    assert_eq!(
        status.current().map(|entry| entry.status.as_str()),
        Some("Completed Assemble book")
    );
    assert!(sink.contains("Completed Full chapters"));
    Ok(())
}

#[test]
fn rerun_regenerates_only_missing_artifacts() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    fs::write(
        temp.path().join(DESCRIPTION_FILE_NAME),
        "A lone astronaut stranded on Mars.",
    )?;

    {
        let store = ArtifactStore::open(temp.path())?;
        let prompts = PromptRegistry::new()?;
        let sink = VecLogSink::new();
        let model = MockLanguageModel::new(FULL_RUN);
        PipelineRunner::for_book(StepEnv::new(&store, &prompts, &sink), &PipelineConfig::default())?
            .run(&model)?;
    }

    let output = temp.path().join("output");
    let chapter_one = fs::read(output.join("chapterfull_1.txt"))?;
    let summary_two = fs::read(output.join("chapter_2.txt"))?;
    fs::remove_file(output.join("chapterfull_2.txt"))?;
    fs::remove_file(output.join("fullbook.md"))?;

    let store = ArtifactStore::open(temp.path())?;
    let prompts = PromptRegistry::new()?;
    let sink = VecLogSink::new();
    let model = MockLanguageModel::new(["The storm came back.", "The shelter held again."]);
    let report =
        PipelineRunner::for_book(StepEnv::new(&store, &prompts, &sink), &PipelineConfig::default())?
            .run(&model)?;

    model.assert_empty();
    assert_eq!(model.calls(), 2);
    assert_eq!(report.requests, 2);
    assert_eq!(fs::read(output.join("chapterfull_1.txt"))?, chapter_one);
    assert_eq!(fs::read(output.join("chapter_2.txt"))?, summary_two);
    assert!(store
        .read(Artifact::FullBook)?
        .contains("The storm came back."));
    Ok(())
}

#[test]
fn completed_book_needs_no_model() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    fs::write(
        temp.path().join(DESCRIPTION_FILE_NAME),
        "A lone astronaut stranded on Mars.",
    )?;
    let store = ArtifactStore::open(temp.path())?;
    let prompts = PromptRegistry::new()?;
    let sink = VecLogSink::new();

    let model = MockLanguageModel::new(FULL_RUN);
    PipelineRunner::for_book(StepEnv::new(&store, &prompts, &sink), &PipelineConfig::default())?
        .run(&model)?;

    let idle = MockLanguageModel::new(Vec::<String>::new());
    let report =
        PipelineRunner::for_book(StepEnv::new(&store, &prompts, &sink), &PipelineConfig::default())?
            .run(&idle)?;
    assert_eq!(idle.calls(), 0);
    assert_eq!(report.total_tokens, 0);
    Ok(())
}
