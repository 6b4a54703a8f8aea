//! The pipeline object: owns the images, feature sets, cached frames, match table and
//! stage of one run, and exposes every pass as a method.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::{info, warn};

use crate::buffer::{MatchTable, MatchVariant};
use crate::config::PipelineConfig;
use crate::dataset::SensorData;
use crate::engine::{
    DenseVerifyParams, EngineError, FeatureEngine, FilterEngine, GeometryParams, MatchParams,
    SurfaceAreaParams,
};
use crate::error::{PipelineError, Result};
use crate::frames::{check_color_resolution, resample_nearest, CachedFrameStore};
use crate::orchestrator::{self, MatchAllReport, PassContext, PassReport, PassScratch};
use crate::pair_index::pairs;
use crate::stage::{Operation, PipelineStage};
use crate::stateio::{self, StateHeader};
use crate::types::{Calibration, FeatureSet, ImagePair, ReferenceTrajectory, RgbdFrame};
use crate::validator::{self, ValidationContext, ValidationReport};

pub struct Pipeline {
    config: PipelineConfig,
    stage: PipelineStage,
    calibration: Option<Calibration>,
    images: Vec<RgbdFrame>,
    trajectory: ReferenceTrajectory,
    features: Vec<FeatureSet>,
    cached: Option<CachedFrameStore>,
    table: MatchTable,
    scratch: PassScratch,
    candidate_pairs: Vec<ImagePair>,
}

/// Operations that only make sense before any matches exist.
fn require_unmatched(stage: PipelineStage, op: Operation) -> Result<()> {
    stage.begin(op)?;
    if stage > PipelineStage::Initialized {
        return Err(PipelineError::AlreadyCompleted {
            operation: op,
            current: stage,
        });
    }
    Ok(())
}

impl Pipeline {
    /// Validates `config` and reserves the match table for `config.max_num_images`.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let table = MatchTable::reserve(
            config.max_num_images,
            config.max_matches_raw,
            config.max_matches_filtered,
        );
        let scratch = PassScratch::new(config.max_matches_raw, config.max_matches_filtered);
        Ok(Self {
            config,
            stage: PipelineStage::Uninitialized,
            calibration: None,
            images: Vec::new(),
            trajectory: ReferenceTrajectory::default(),
            features: Vec::new(),
            cached: None,
            table,
            scratch,
            candidate_pairs: Vec::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn num_images(&self) -> usize {
        self.images.len()
    }

    /// Calibration at the working resolution, once initialized.
    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    pub fn features(&self) -> &[FeatureSet] {
        &self.features
    }

    pub fn cached_frames(&self) -> Option<&CachedFrameStore> {
        self.cached.as_ref()
    }

    pub fn table(&self) -> &MatchTable {
        &self.table
    }

    /// Pairs whose raw match count exceeded `min_num_matches`.
    pub fn candidate_pairs(&self) -> &[ImagePair] {
        &self.candidate_pairs
    }

    /// Pairs that survived filtering so far; empty before the geometric pass.
    pub fn filtered_pairs(&self) -> Vec<ImagePair> {
        if !self.stage.has_filtered_matches() {
            return Vec::new();
        }
        pairs(self.num_images())
            .filter(|&p| matches!(self.table.count(MatchVariant::Filtered, p), Ok(n) if n > 0))
            .collect()
    }

    /// Loads the images, brings colour to the working resolution and builds the cached
    /// frames.
    pub fn initialize(&mut self, sensor: SensorData) -> Result<()> {
        let next = self.stage.begin(Operation::Initialize)?;
        let SensorData {
            mut calibration,
            mut frames,
            trajectory,
        } = sensor;
        self.table.check_image_count(frames.len())?;
        if !trajectory.is_empty() && trajectory.len() != frames.len() {
            return Err(PipelineError::Configuration(format!(
                "{} reference poses for {} images",
                trajectory.len(),
                frames.len()
            )));
        }

        check_color_resolution(&frames, &calibration.color)?;
        let (w, h) = (self.config.working_width, self.config.working_height);
        if (calibration.color.width, calibration.color.height) != (w, h) {
            info!(
                "resampling colour from {}x{} to {w}x{h}",
                calibration.color.width, calibration.color.height
            );
            for frame in &mut frames {
                let c = &mut frame.color;
                c.data = resample_nearest(&c.data, c.width, c.height, w, h);
                c.width = w;
                c.height = h;
            }
            calibration.color = calibration.color.rescaled(w, h);
        }

        let cached = CachedFrameStore::build(
            &frames,
            &calibration.depth,
            self.config.downsampled_width,
            self.config.downsampled_height,
        )?;

        info!("initialized with {} images", frames.len());
        self.features = vec![FeatureSet::default(); frames.len()];
        self.images = frames;
        self.trajectory = trajectory;
        self.calibration = Some(calibration);
        self.cached = Some(cached);
        self.stage = next;
        Ok(())
    }

    /// Installs externally computed feature sets, one per image.
    pub fn set_features(&mut self, mut features: Vec<FeatureSet>) -> Result<()> {
        require_unmatched(self.stage, Operation::SetFeatures)?;
        if features.len() != self.num_images() {
            return Err(PipelineError::Configuration(format!(
                "{} feature sets for {} images",
                features.len(),
                self.num_images()
            )));
        }
        for (image, set) in features.iter_mut().enumerate() {
            let dropped = set.truncate(self.config.max_keys_per_image);
            if dropped > 0 {
                warn!("image {image}: dropped {dropped} key points over the per-image limit");
            }
        }
        self.features = features;
        Ok(())
    }

    /// Runs `engine.detect` on every image. An image whose detection fails ends up with
    /// no features; an engine that cannot detect at all is an error.
    pub fn detect_features<E: FeatureEngine + ?Sized>(&mut self, engine: &E) -> Result<()> {
        require_unmatched(self.stage, Operation::SetFeatures)?;
        let mut features = Vec::with_capacity(self.num_images());
        for (image, frame) in self.images.iter().enumerate() {
            match engine.detect(image, frame) {
                Ok(set) => features.push(set),
                Err(source @ EngineError::Unsupported(_)) => {
                    return Err(PipelineError::Detection { image, source })
                }
                Err(e) => {
                    warn!("detection failed for image {image}: {e}");
                    features.push(FeatureSet::default());
                }
            }
        }
        self.set_features(features)
    }

    /// Checks `op` against the stage, then hands out the working-resolution inverse
    /// intrinsics used to lift key points.
    fn inverse_intrinsics_for(&self, op: Operation) -> Result<nalgebra::Matrix3<f32>> {
        self.stage.begin(op)?;
        self.calibration
            .as_ref()
            .map(|c| c.color.inverse())
            .ok_or_else(|| PipelineError::Configuration("pipeline has no calibration".to_string()))
    }

    pub fn match_all<E: FeatureEngine + ?Sized>(&mut self, engine: &E) -> Result<MatchAllReport> {
        let params = MatchParams {
            distance_thresh: self.config.match_thresh,
            ratio_max: self.config.match_ratio_max,
        };
        let ctx = PassContext {
            features: &self.features,
            frames: self.cached.as_ref(),
        };
        let (stage, report) = orchestrator::match_all(
            self.stage,
            &mut self.table,
            &mut self.scratch.raw,
            &ctx,
            engine,
            &params,
            self.config.min_num_matches,
        )?;
        self.stage = stage;
        self.candidate_pairs = report.candidates.clone();
        Ok(report)
    }

    pub fn filter_by_geometry<E: FilterEngine + ?Sized>(&mut self, engine: &E) -> Result<PassReport> {
        let params = GeometryParams {
            inverse_intrinsics: self.inverse_intrinsics_for(Operation::FilterByGeometry)?,
            min_matches: self.config.min_num_matches,
            max_residual2: self.config.max_kabsch_residual2,
        };
        let ctx = PassContext {
            features: &self.features,
            frames: self.cached.as_ref(),
        };
        let (stage, report) = orchestrator::filter_by_geometry(
            self.stage,
            &mut self.table,
            &mut self.scratch,
            &ctx,
            engine,
            &params,
        )?;
        self.stage = stage;
        Ok(report)
    }

    pub fn filter_by_surface_area<E: FilterEngine + ?Sized>(
        &mut self,
        engine: &E,
    ) -> Result<PassReport> {
        let params = SurfaceAreaParams {
            inverse_intrinsics: self.inverse_intrinsics_for(Operation::FilterBySurfaceArea)?,
            min_matches: self.config.min_num_matches,
            area_thresh: self.config.surf_area_pca_thresh,
        };
        let ctx = PassContext {
            features: &self.features,
            frames: self.cached.as_ref(),
        };
        let (stage, report) = orchestrator::filter_by_surface_area(
            self.stage,
            &mut self.table,
            &mut self.scratch,
            &ctx,
            engine,
            &params,
        )?;
        self.stage = stage;
        Ok(report)
    }

    pub fn filter_by_dense_verify<E: FilterEngine + ?Sized>(
        &mut self,
        engine: &E,
    ) -> Result<PassReport> {
        let inverse_intrinsics = self.inverse_intrinsics_for(Operation::FilterByDenseVerify)?;
        let depth_intrinsics = self
            .cached
            .as_ref()
            .map(|c| *c.intrinsics())
            .ok_or_else(|| PipelineError::Configuration("no cached frames".to_string()))?;
        let params = DenseVerifyParams {
            inverse_intrinsics,
            depth_intrinsics,
            min_matches: self.config.min_num_matches,
            dist_thresh: self.config.proj_corr_dist_thresh,
            normal_thresh: self.config.proj_corr_normal_thresh,
            color_thresh: self.config.proj_corr_color_thresh,
            err_thresh: self.config.verify_err_thresh,
            corr_thresh: self.config.verify_corr_thresh,
            depth_min: self.config.sensor_depth_min,
            depth_max: self.config.sensor_depth_max,
        };
        let ctx = PassContext {
            features: &self.features,
            frames: self.cached.as_ref(),
        };
        let (stage, report) = orchestrator::filter_by_dense_verify(
            self.stage,
            &mut self.table,
            &mut self.scratch,
            &ctx,
            engine,
            &params,
        )?;
        self.stage = stage;
        Ok(report)
    }

    /// Classifies the current filtering decisions against the reference trajectory.
    pub fn validate(&self) -> Result<ValidationReport> {
        let inverse = self.inverse_intrinsics_for(Operation::Validate)?;
        validator::validate(
            self.stage,
            &ValidationContext {
                table: &self.table,
                candidates: &self.candidate_pairs,
                features: &self.features,
                trajectory: &self.trajectory,
                inverse_intrinsics: &inverse,
                min_num_matches: self.config.min_num_matches,
                config: &self.config.validator,
            },
        )
    }

    fn header(&self) -> StateHeader {
        StateHeader {
            num_images: self.num_images(),
            stage: self.stage,
            candidate_pairs: self.candidate_pairs.clone(),
        }
    }

    pub fn save_state(&self, path: &Path) -> Result<()> {
        stateio::save_to_file(path, &self.header(), &self.table)?;
        info!("saved state at {:?} to {}", self.stage, path.display());
        Ok(())
    }

    /// Restores matches saved by an earlier run over the same images. Only allowed right
    /// after initialization; the stage becomes the saved one.
    pub fn load_state(&mut self, path: &Path) -> Result<PipelineStage> {
        require_unmatched(self.stage, Operation::LoadState)?;
        let mut reader = BufReader::new(File::open(path)?);
        let header = stateio::read_header(&mut reader)?;
        if header.stage < PipelineStage::Initialized {
            return Err(PipelineError::Corrupt(format!(
                "state file stage {:?} precedes initialization",
                header.stage
            )));
        }
        if header.num_images != self.num_images() {
            return Err(PipelineError::Configuration(format!(
                "state file covers {} images, pipeline has {}",
                header.num_images,
                self.num_images()
            )));
        }
        stateio::read_rows(&mut reader, &header, &mut self.table)?;

        self.stage = header.stage;
        self.candidate_pairs = header.candidate_pairs;
        info!("loaded state at {:?} from {}", self.stage, path.display());
        Ok(self.stage)
    }
}
