//! Per-pipeline configuration stored alongside a job record.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Granularity of the work items a pipeline produces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Page,
    Chunk,
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitKind::Page => write!(f, "page"),
            UnitKind::Chunk => write!(f, "chunk"),
        }
    }
}

/// Options for a page-oriented pipeline (one unit per rendered page).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PagedOptions {
    pub model: String,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    /// Upper bound on the number of pages processed; `None` means all.
    #[serde(default)]
    pub max_pages: Option<u32>,
}

fn default_dpi() -> u32 {
    200
}

/// Options for a chunk-oriented pipeline (text split into overlapping chunks).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkedOptions {
    pub model: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub instructions: Option<String>,
}

fn default_chunk_size() -> usize {
    4000
}

/// Pipeline configuration, discriminated by pipeline kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "pipeline", rename_all = "snake_case")]
pub enum PipelineOptions {
    Paged(PagedOptions),
    Chunked(ChunkedOptions),
}

#[derive(Error, Debug, PartialEq)]
pub enum OptionsError {
    #[error("Model name must not be empty")]
    EmptyModel,

    #[error("DPI {0} is outside the supported range 72-600")]
    DpiOutOfRange(u32),

    #[error("max_pages must be greater than zero")]
    ZeroMaxPages,

    #[error("chunk_size must be greater than zero")]
    ZeroChunkSize,

    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    OverlapTooLarge { overlap: usize, size: usize },
}

impl PipelineOptions {
    pub fn unit_kind(&self) -> UnitKind {
        match self {
            PipelineOptions::Paged(_) => UnitKind::Page,
            PipelineOptions::Chunked(_) => UnitKind::Chunk,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            PipelineOptions::Paged(o) => &o.model,
            PipelineOptions::Chunked(o) => &o.model,
        }
    }

    /// Validates the options. Called once when a job is created.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.model().trim().is_empty() {
            return Err(OptionsError::EmptyModel);
        }

        match self {
            PipelineOptions::Paged(o) => {
                if !(72..=600).contains(&o.dpi) {
                    return Err(OptionsError::DpiOutOfRange(o.dpi));
                }
                if o.max_pages == Some(0) {
                    return Err(OptionsError::ZeroMaxPages);
                }
            }
            PipelineOptions::Chunked(o) => {
                if o.chunk_size == 0 {
                    return Err(OptionsError::ZeroChunkSize);
                }
                if o.chunk_overlap >= o.chunk_size {
                    return Err(OptionsError::OverlapTooLarge {
                        overlap: o.chunk_overlap,
                        size: o.chunk_size,
                    });
                }
            }
        }

        Ok(())
    }
}
