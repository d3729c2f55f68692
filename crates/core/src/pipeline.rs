use std::collections::VecDeque;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::artifacts::{Artifact, ArtifactError, ArtifactStore};
use crate::config::PipelineConfig;
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::{LanguageModel, MeteredModel};
use crate::status::{ProjectStatus, StatusError};
use crate::steps::{
    AssembleBookStep, ChapterOutlinesStep, ChapterSummariesStep, DetermineTitleStep,
    FullChaptersStep, Step, StepEnv, StepError, TableOfContentsStep, WritePlotStep,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("step `{step}` failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: StepError,
    },
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Outcome of a finished run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    pub steps: Vec<&'static str>,
    pub requests: usize,
    pub total_tokens: u64,
    pub elapsed: Duration,
}

impl RunReport {
    /// Elapsed wall time as `H:MM:SS`.
    pub fn elapsed_display(&self) -> String {
        format_elapsed(self.elapsed)
    }

    pub fn summary_text(&self) -> String {
        format!(
            "Total tokens used: {}\nElapsed time: {}\n",
            self.total_tokens,
            self.elapsed_display()
        )
    }

    /// Writes `output/summary.txt`.
    pub fn write_summary(&self, artifacts: &ArtifactStore) -> Result<(), ArtifactError> {
        artifacts.write(Artifact::RunSummary, &self.summary_text())?;
        Ok(())
    }
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    format!(
        "{}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Runs steps in order, advancing each until it reports completion.
pub struct PipelineRunner<'a> {
    steps: VecDeque<Box<dyn Step + 'a>>,
    status: Option<ProjectStatus>,
    sink: &'a dyn LogSink,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(sink: &'a dyn LogSink) -> Self {
        Self {
            steps: VecDeque::new(),
            status: None,
            sink,
        }
    }

    /// The book pipeline: optional plot, title, table of contents, summaries,
    /// outlines, full chapters, assembly. Progress goes to `output/status.json`.
    pub fn for_book(env: StepEnv<'a>, options: &PipelineConfig) -> Result<Self, PipelineError> {
        let status = ProjectStatus::load_or_init(env.artifacts.output_dir())?;
        let mut runner = Self::new(env.sink).with_status(status);
        if options.include_plot {
            runner.push(WritePlotStep::new(env, options.plot_refine_rounds));
        }
        runner.push(DetermineTitleStep::new(env));
        runner.push(TableOfContentsStep::new(env));
        runner.push(ChapterSummariesStep::new(env));
        runner.push(ChapterOutlinesStep::new(env));
        runner.push(FullChaptersStep::new(env));
        runner.push(AssembleBookStep::new(env));
        Ok(runner)
    }

    pub fn with_status(mut self, status: ProjectStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn push<S: Step + 'a>(&mut self, step: S) {
        self.steps.push_back(Box::new(step));
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub fn status(&self) -> Option<&ProjectStatus> {
        self.status.as_ref()
    }

    /// Drives every step to completion. The first failing phase ends the run.
    pub fn run(&mut self, model: &dyn LanguageModel) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        let metered = MeteredModel::new(model);
        let mut completed = Vec::new();

        while let Some(mut step) = self.steps.pop_front() {
            let name = step.name();
            self.record(format!("Started {name}"))?;
            self.log(LogLevel::Info, format!("Starting {name}."));

            while !step.is_complete() {
                if let Err(source) = step.advance(&metered) {
                    self.log(LogLevel::Error, format!("{name} failed: {source}"));
                    return Err(PipelineError::Step { step: name, source });
                }
            }

            self.record(format!("Completed {name}"))?;
            self.log(LogLevel::Info, format!("Completed {name}."));
            completed.push(name);
        }

        Ok(RunReport {
            steps: completed,
            requests: metered.requests(),
            total_tokens: metered.total_tokens(),
            elapsed: started.elapsed(),
        })
    }

    fn record(&mut self, message: String) -> Result<(), PipelineError> {
        if let Some(status) = self.status.as_mut() {
            status.set_current(message);
            status.save()?;
        }
        Ok(())
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}
