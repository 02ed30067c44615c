//! External collaborators the runner drives: fetch, split, transform, merge.
//!
//! Implementations live outside this crate (blob storage, model calls);
//! the runner only sees these traits.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use thiserror::Error;

use crate::job::{ErrorKind, PipelineOptions, UnitKind};

/// One page or chunk of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub index: usize,
    pub kind: UnitKind,
    pub content: Vec<u8>,
}

impl Unit {
    pub fn new(index: usize, kind: UnitKind, content: impl Into<Vec<u8>>) -> Self {
        Self {
            index,
            kind,
            content: content.into(),
        }
    }
}

/// Job-level collaborator failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("Failed to fetch document: {0}")]
    Fetch(String),

    #[error("Failed to extract document content: {0}")]
    Extract(String),

    #[error("Failed to split document into units: {0}")]
    Split(String),

    #[error("Failed to merge unit artifacts: {0}")]
    Merge(String),
}

/// Unit-scoped transform failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("Unit transform timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unit transform failed: {0}")]
    Failed(String),
}

impl TransformError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransformError::Timeout(_) => ErrorKind::Timeout,
            TransformError::Failed(_) => ErrorKind::Other,
        }
    }
}

pub trait DocumentFetcher: Send + Sync {
    fn fetch(&self, source: &str) -> Result<Vec<u8>, CollaboratorError>;
}

pub trait UnitSplitter: Send + Sync {
    /// Turns the raw document into splittable content. Defaults to passthrough.
    fn extract(
        &self,
        document: Vec<u8>,
        _options: &PipelineOptions,
    ) -> Result<Vec<u8>, CollaboratorError> {
        Ok(document)
    }

    fn split(
        &self,
        document: &[u8],
        options: &PipelineOptions,
    ) -> Result<Vec<Unit>, CollaboratorError>;
}

pub trait UnitTransformer: Send + Sync {
    /// Processes one unit and returns a reference to its artifact.
    ///
    /// Implementors must give up once `timeout` has elapsed. The runner
    /// stops waiting at that point but cannot cancel the call, so a
    /// transform that never returns pins its `docpipe-unit-N` thread (and
    /// a clone of the transformer) for the life of the process.
    fn transform(
        &self,
        unit: &Unit,
        options: &PipelineOptions,
        timeout: Duration,
    ) -> Result<String, TransformError>;
}

pub trait ArtifactMerger: Send + Sync {
    /// Combines artifacts (already in unit order) into the final output.
    fn merge(&self, job_id: &str, artifacts: &[String]) -> Result<String, CollaboratorError>;
}

/// The set of collaborators a pipeline runs with.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn DocumentFetcher>,
    pub splitter: Arc<dyn UnitSplitter>,
    pub transformer: Arc<dyn UnitTransformer>,
    pub merger: Arc<dyn ArtifactMerger>,
}

/// Runs one transform on a helper thread and waits at most `timeout`.
///
/// A transform that overruns keeps running detached until it returns on its
/// own; its late result is dropped.
pub fn transform_with_timeout(
    transformer: &Arc<dyn UnitTransformer>,
    unit: &Unit,
    options: &PipelineOptions,
    timeout: Duration,
) -> Result<String, TransformError> {
    let (tx, rx) = bounded(1);
    let transformer = Arc::clone(transformer);
    let unit = unit.clone();
    let options = options.clone();

    let spawned = std::thread::Builder::new()
        .name(format!("docpipe-unit-{}", unit.index))
        .spawn(move || {
            let result = transformer.transform(&unit, &options, timeout);
            // The runner may have stopped waiting
            let _ = tx.send(result);
        });
    if let Err(e) = spawned {
        return Err(TransformError::Failed(format!(
            "could not spawn transform thread: {}",
            e
        )));
    }

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(TransformError::Timeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => {
            Err(TransformError::Failed("transform panicked".to_string()))
        }
    }
}
