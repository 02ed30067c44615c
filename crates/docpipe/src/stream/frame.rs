//! Frame types carried by the progress stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{"type":"progress","stage":..,"message":..,"progress":..}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressFrame {
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub progress: f64,
}

/// `{"type":"error","message":..,"details":..}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorFrame {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: String,
}

/// `{"type":"result","success":..,"data":{..},"stats":{..}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultFrame {
    pub success: bool,
    #[serde(default = "empty_object")]
    pub data: Value,
    #[serde(default = "empty_object")]
    pub stats: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// One self-delimited object of the stream, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamFrame {
    Progress(ProgressFrame),
    Error(ErrorFrame),
    Result(ResultFrame),
}

impl StreamFrame {
    pub fn progress(stage: &str, message: impl Into<String>, progress: u8) -> Self {
        StreamFrame::Progress(ProgressFrame {
            stage: stage.to_string(),
            message: message.into(),
            progress: progress as f64,
        })
    }

    pub fn error(message: impl Into<String>, details: impl Into<String>) -> Self {
        StreamFrame::Error(ErrorFrame {
            message: message.into(),
            details: details.into(),
        })
    }

    pub fn result(success: bool, data: Value, stats: Value) -> Self {
        StreamFrame::Result(ResultFrame {
            success,
            data,
            stats,
        })
    }

    /// Interprets a decoded JSON object. Returns `None` for objects whose
    /// `type` is missing or unknown, or whose fields have the wrong shape.
    pub fn from_value(value: Value) -> Option<Self> {
        match serde_json::from_value(value) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::debug!("Skipping undispatchable frame: {}", e);
                None
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamFrame::Progress(_) => "progress",
            StreamFrame::Error(_) => "error",
            StreamFrame::Result(_) => "result",
        }
    }
}
