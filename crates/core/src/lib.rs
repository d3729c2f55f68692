pub mod artifacts;
pub mod config;
pub mod logging;
pub mod message;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod status;
pub mod steps;
pub mod tokens;

pub use artifacts::{
    Artifact, ArtifactError, ArtifactStore, ArtifactWriter, ChapterKind, ManifestEntry,
    DESCRIPTION_FILE_NAME, MANIFEST_FILE_NAME, OUTPUT_DIR_NAME,
};
pub use config::{
    Backend, Config, ConfigError, EmbeddingConfig, LlmConfig, ModelSpec, ModelTable,
    PipelineConfig, PromptConfig,
};
pub use logging::{
    FacadeLogSink, LogLevel, LogRecord, LogSink, MessageLog, MessageLogMode, NullLogSink,
    SharedLogSink, VecLogSink,
};
pub use message::{Message, Role, Transcript};
pub use model::{
    Completion, ContextSize, EmbeddingModel, LanguageModel, MeteredModel, ModelError,
    QualityTier, RequestOptions,
};
pub use pipeline::{PipelineError, PipelineRunner, RunReport};
pub use prompts::{PromptError, PromptRegistry, PromptSource, PromptTemplate};
pub use status::{ProjectStatus, StatusEntry, StatusError};
pub use steps::{
    AssembleBookStep, ChapterOutlinesStep, ChapterSummariesStep, DetermineTitleStep,
    FullChaptersStep, Step, StepEnv, StepError, TableOfContentsStep, WritePlotStep,
};
pub use tokens::{TokenBudget, TokenBudgetError};
