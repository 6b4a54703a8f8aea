//! Pairwise feature-match cache and staged filtering for offline RGB-D reconstruction.
//!
//! Images are matched against every predecessor into a fixed-capacity triangular table
//! ([`buffer::MatchTable`]); three filter passes then narrow each pair's matches, gated by
//! a monotonic [`PipelineStage`]. Engines are injected through [`engine::FeatureEngine`]
//! and [`engine::FilterEngine`]; [`engine::CpuEngine`] is the bundled reference.

pub mod buffer;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod frames;
pub mod geometry;
pub mod logging;
pub mod orchestrator;
pub mod pair_index;
pub mod pipeline;
pub mod stage;
pub mod stateio;
pub mod types;
pub mod validator;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::Pipeline;
pub use stage::{Operation, PipelineStage};
