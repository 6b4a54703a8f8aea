use thiserror::Error;

use crate::engine::EngineError;
use crate::stage::{Operation, PipelineStage};

/// Fatal pipeline errors. Per-pair engine failures never show up here; they are
/// absorbed into empty records by the orchestrator.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("capacity exceeded: {requested} images requested, {max} reserved")]
    CapacityExceeded { requested: usize, max: usize },

    #[error("{operation:?} requires stage {required:?}, pipeline is at {current:?}")]
    StageViolation {
        operation: Operation,
        required: PipelineStage,
        current: PipelineStage,
    },

    #[error("{operation:?} already completed (pipeline is at {current:?}); start a new pipeline to rerun it")]
    AlreadyCompleted {
        operation: Operation,
        current: PipelineStage,
    },

    #[error("image pair ({i}, {j}) is outside the reserved triangle of {max_images} images")]
    PairOutOfRange { i: usize, j: usize, max_images: usize },

    #[error("feature detection failed for image {image}: {source}")]
    Detection {
        image: usize,
        #[source]
        source: EngineError,
    },

    #[error("corrupt state file: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dataset decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("dataset encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
