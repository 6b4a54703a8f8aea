use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use rgbd_pair_matcher::dataset::FrameSelection;

/// Last pass to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Until {
    Match,
    Geometry,
    SurfaceArea,
    DenseVerify,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Match and filter key points across every pair of an RGB-D sequence")]
pub struct Args {
    /// Recorded sensor file (calibration, frames, optional ground truth)
    #[arg(long)]
    pub sensor: PathBuf,

    /// Key point file with one feature set per image
    #[arg(long)]
    pub keys: PathBuf,

    /// JSON pipeline configuration; defaults are used when absent
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// State file: loaded when present, rewritten after every pass
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Only use frames START..END
    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    pub frames: Option<Vec<usize>>,

    /// Keep every SKIP-th frame of the range
    #[arg(long, default_value_t = 1)]
    pub skip: usize,

    #[arg(long, value_enum, default_value_t = Until::DenseVerify)]
    pub until: Until,

    /// Compare filtering decisions with the recorded trajectory
    #[arg(long)]
    pub validate: bool,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn selection(&self) -> FrameSelection {
        let range = match self.frames.as_deref() {
            Some(&[start, end]) => Some((start, end)),
            _ => None,
        };
        FrameSelection { range, skip: self.skip }
    }

    pub fn mode(&self) -> StateMode {
        match &self.state {
            Some(p) if p.exists() => StateMode::Resume(p.clone()),
            Some(p) => StateMode::Fresh(Some(p.clone())),
            None => StateMode::Fresh(None),
        }
    }
}

#[derive(Clone, Debug)]
pub enum StateMode {
    /// Compute from scratch, optionally saving to the given path.
    Fresh(Option<PathBuf>),
    Resume(PathBuf),
}

impl StateMode {
    pub fn save_path(&self) -> Option<&PathBuf> {
        match self {
            StateMode::Fresh(p) => p.as_ref(),
            StateMode::Resume(p) => Some(p),
        }
    }
}
