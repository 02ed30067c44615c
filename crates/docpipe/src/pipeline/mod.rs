pub mod checkpoint;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod error;
pub mod memory;
pub mod progress;
pub mod runner;

pub use checkpoint::Checkpoint;
pub use collaborators::{
    ArtifactMerger, CollaboratorError, Collaborators, DocumentFetcher, TransformError, Unit,
    UnitSplitter, UnitTransformer,
};
pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::PipelineError;
pub use progress::{
    BroadcastProgress, CollectingProgress, NoopProgress, ProgressReporter, StreamProgress,
};
pub use runner::{result_frame, Pipeline, RunOutcome, RunSummary};
