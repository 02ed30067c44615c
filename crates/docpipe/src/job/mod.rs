//! Job records, their status machine and progress model.

pub mod options;
pub mod progress;
pub mod record;
pub mod status;
pub mod transition;

pub use options::{ChunkedOptions, OptionsError, PagedOptions, PipelineOptions, UnitKind};
pub use progress::{ProgressModel, StageThreshold};
pub use record::{AttemptSummary, ErrorKind, JobRecord, LogEntry, UnitArtifact, UnitError};
pub use status::JobStatus;
pub use transition::{Transition, TransitionError};
