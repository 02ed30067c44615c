//! Scripted collaborators and config builders.
//!
//! A `Script` plays every collaborator role: the fetched document is one
//! byte per unit, and each unit's transform behaves as scripted.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use docpipe::job::{ChunkedOptions, PagedOptions, PipelineOptions};
use docpipe::pipeline::{
    ArtifactMerger, CollaboratorError, Collaborators, DocumentFetcher, PipelineConfig,
    TransformError, Unit, UnitSplitter, UnitTransformer,
};

/// What the transform does for one unit.
#[derive(Debug, Clone)]
pub enum UnitScript {
    Fail(String),
    /// Fails the first call for the unit only.
    FailOnce(String),
    /// Sleeps before answering, to trip the runner's bounded wait.
    Slow(Duration),
}

type UnitHook = Box<dyn Fn(usize) + Send + Sync>;

pub struct Script {
    units: usize,
    behaviour: HashMap<usize, UnitScript>,
    fetch_error: Option<String>,
    merge_error: Option<String>,
    hook: Option<UnitHook>,
    calls: Mutex<Vec<usize>>,
    merged: Mutex<Vec<Vec<String>>>,
}

impl Script {
    /// Unit indexes the transform was called with, in call order.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }

    /// Artifact lists handed to the merger.
    pub fn merged(&self) -> Vec<Vec<String>> {
        self.merged.lock().unwrap().clone()
    }
}

impl DocumentFetcher for Script {
    fn fetch(&self, source: &str) -> Result<Vec<u8>, CollaboratorError> {
        if let Some(ref message) = self.fetch_error {
            return Err(CollaboratorError::Fetch(format!("{}: {}", source, message)));
        }
        Ok((0..self.units).map(|i| i as u8).collect())
    }
}

impl UnitSplitter for Script {
    fn split(
        &self,
        document: &[u8],
        options: &PipelineOptions,
    ) -> Result<Vec<Unit>, CollaboratorError> {
        Ok(document
            .iter()
            .enumerate()
            .map(|(i, b)| Unit::new(i, options.unit_kind(), vec![*b]))
            .collect())
    }
}

impl UnitTransformer for Script {
    fn transform(
        &self,
        unit: &Unit,
        _options: &PipelineOptions,
        _timeout: Duration,
    ) -> Result<String, TransformError> {
        let earlier = {
            let mut calls = self.calls.lock().unwrap();
            let earlier = calls.iter().filter(|&&i| i == unit.index).count();
            calls.push(unit.index);
            earlier
        };
        if let Some(ref hook) = self.hook {
            hook(unit.index);
        }
        match self.behaviour.get(&unit.index) {
            Some(UnitScript::Fail(message)) => Err(TransformError::Failed(message.clone())),
            Some(UnitScript::FailOnce(message)) if earlier == 0 => {
                Err(TransformError::Failed(message.clone()))
            }
            Some(UnitScript::Slow(delay)) => {
                std::thread::sleep(*delay);
                Ok(format!("artifact-{}", unit.index))
            }
            _ => Ok(format!("artifact-{}", unit.index)),
        }
    }
}

impl ArtifactMerger for Script {
    fn merge(&self, job_id: &str, artifacts: &[String]) -> Result<String, CollaboratorError> {
        self.merged.lock().unwrap().push(artifacts.to_vec());
        if let Some(ref message) = self.merge_error {
            return Err(CollaboratorError::Merge(message.clone()));
        }
        Ok(format!("output/{}.bin", job_id))
    }
}

/// Builder for a `Script` and the `Collaborators` backed by it.
pub struct ScriptBuilder {
    units: usize,
    behaviour: HashMap<usize, UnitScript>,
    fetch_error: Option<String>,
    merge_error: Option<String>,
    hook: Option<UnitHook>,
}

impl ScriptBuilder {
    pub fn new(units: usize) -> Self {
        Self {
            units,
            behaviour: HashMap::new(),
            fetch_error: None,
            merge_error: None,
            hook: None,
        }
    }

    pub fn failing(mut self, index: usize) -> Self {
        self.behaviour
            .insert(index, UnitScript::Fail(format!("unit {} rejected", index)));
        self
    }

    pub fn flaky(mut self, index: usize) -> Self {
        self.behaviour
            .insert(index, UnitScript::FailOnce(format!("unit {} hiccup", index)));
        self
    }

    pub fn slow(mut self, index: usize, delay: Duration) -> Self {
        self.behaviour.insert(index, UnitScript::Slow(delay));
        self
    }

    pub fn fetch_error(mut self, message: &str) -> Self {
        self.fetch_error = Some(message.to_string());
        self
    }

    pub fn merge_error(mut self, message: &str) -> Self {
        self.merge_error = Some(message.to_string());
        self
    }

    /// Runs `hook` at the start of every transform call.
    pub fn on_unit(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> (Collaborators, Arc<Script>) {
        let script = Arc::new(Script {
            units: self.units,
            behaviour: self.behaviour,
            fetch_error: self.fetch_error,
            merge_error: self.merge_error,
            hook: self.hook,
            calls: Mutex::new(Vec::new()),
            merged: Mutex::new(Vec::new()),
        });
        let collaborators = Collaborators {
            fetcher: script.clone(),
            splitter: script.clone(),
            transformer: script.clone(),
            merger: script.clone(),
        };
        (collaborators, script)
    }
}

/// Pipeline settings suited to tests: short unit timeout, no retry delay.
pub fn test_pipeline_config() -> PipelineConfig {
    PipelineConfig {
        unit_timeout: Duration::from_millis(200),
        checkpoint_retry_delay: Duration::ZERO,
        ..PipelineConfig::default()
    }
}

pub fn chunked_options() -> PipelineOptions {
    PipelineOptions::Chunked(ChunkedOptions {
        model: "summarizer".to_string(),
        chunk_size: 1000,
        chunk_overlap: 100,
        instructions: None,
    })
}

pub fn paged_options(max_pages: Option<u32>) -> PipelineOptions {
    PipelineOptions::Paged(PagedOptions {
        model: "ocr".to_string(),
        dpi: 300,
        max_pages,
    })
}
