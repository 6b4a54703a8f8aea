//! Pipeline progress and the operations it gates.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Global progress of a run. Ordered; only ever moves forward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[repr(i32)]
pub enum PipelineStage {
    #[default]
    Uninitialized = 0,
    Initialized = 1,
    HasRawMatches = 2,
    FilteredByGeometry = 3,
    FilteredBySurfaceArea = 4,
    FilteredByDenseVerify = 5,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 6] = [
        PipelineStage::Uninitialized,
        PipelineStage::Initialized,
        PipelineStage::HasRawMatches,
        PipelineStage::FilteredByGeometry,
        PipelineStage::FilteredBySurfaceArea,
        PipelineStage::FilteredByDenseVerify,
    ];

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_i32() == value)
    }

    pub fn has_raw_matches(self) -> bool {
        self >= PipelineStage::HasRawMatches
    }

    pub fn has_filtered_matches(self) -> bool {
        self >= PipelineStage::FilteredByGeometry
    }

    /// Checks that `op` may run from this stage and returns the stage the pipeline
    /// moves to once `op` has completed for every pair.
    pub fn begin(self, op: Operation) -> Result<PipelineStage> {
        if let Some(required) = op.required() {
            if self < required {
                return Err(PipelineError::StageViolation {
                    operation: op,
                    required,
                    current: self,
                });
            }
        }
        match op.produces() {
            Some(produced) if self >= produced => Err(PipelineError::AlreadyCompleted {
                operation: op,
                current: self,
            }),
            Some(produced) => Ok(produced),
            None => Ok(self),
        }
    }
}

/// Operations gated by [`PipelineStage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Initialize,
    SetFeatures,
    MatchAll,
    FilterByGeometry,
    FilterBySurfaceArea,
    FilterByDenseVerify,
    Validate,
    LoadState,
}

impl Operation {
    pub fn required(self) -> Option<PipelineStage> {
        match self {
            Operation::Initialize => None,
            Operation::SetFeatures | Operation::MatchAll | Operation::LoadState => {
                Some(PipelineStage::Initialized)
            }
            Operation::FilterByGeometry | Operation::Validate => {
                Some(PipelineStage::HasRawMatches)
            }
            Operation::FilterBySurfaceArea => Some(PipelineStage::FilteredByGeometry),
            Operation::FilterByDenseVerify => Some(PipelineStage::FilteredBySurfaceArea),
        }
    }

    pub fn produces(self) -> Option<PipelineStage> {
        match self {
            Operation::Initialize => Some(PipelineStage::Initialized),
            Operation::MatchAll => Some(PipelineStage::HasRawMatches),
            Operation::FilterByGeometry => Some(PipelineStage::FilteredByGeometry),
            Operation::FilterBySurfaceArea => Some(PipelineStage::FilteredBySurfaceArea),
            Operation::FilterByDenseVerify => Some(PipelineStage::FilteredByDenseVerify),
            Operation::SetFeatures | Operation::Validate | Operation::LoadState => None,
        }
    }
}
