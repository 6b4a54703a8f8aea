use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Which raw correspondences the validator projects when judging a rejected pair.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NegativeSampling {
    /// Only the first `min_num_matches` raw correspondences.
    #[default]
    FirstMinMatches,
    All,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Squared residual (metres²) above which a correspondence is wrong.
    pub max_residual2: f32,
    pub negative_sampling: NegativeSampling,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_residual2: 0.05 * 0.05,
            negative_sampling: NegativeSampling::FirstMinMatches,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RansacConfig {
    pub max_iters: usize,
    /// Base seed; each pair mixes in its own index so results do not depend on pass order.
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iters: 128,
            seed: 1_234_567,
        }
    }
}

/// Every tunable of a matching run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_num_images: usize,
    pub max_keys_per_image: usize,
    pub max_matches_raw: usize,
    pub max_matches_filtered: usize,

    pub match_ratio_max: f32,
    pub match_thresh: f32,
    /// A pair needs strictly more raw matches than this to become a candidate.
    pub min_num_matches: usize,

    pub max_kabsch_residual2: f32,
    pub surf_area_pca_thresh: f32,

    pub working_width: usize,
    pub working_height: usize,
    pub downsampled_width: usize,
    pub downsampled_height: usize,

    pub proj_corr_dist_thresh: f32,
    pub proj_corr_normal_thresh: f32,
    pub proj_corr_color_thresh: f32,
    pub verify_err_thresh: f32,
    pub verify_corr_thresh: f32,
    pub sensor_depth_min: f32,
    pub sensor_depth_max: f32,

    pub validator: ValidatorConfig,
    pub ransac: RansacConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_num_images: 1200,
            max_keys_per_image: 1024,
            max_matches_raw: 128,
            max_matches_filtered: 25,
            match_ratio_max: 0.8,
            match_thresh: 0.7,
            min_num_matches: 3,
            max_kabsch_residual2: 0.0004,
            surf_area_pca_thresh: 0.032,
            working_width: 640,
            working_height: 480,
            downsampled_width: 80,
            downsampled_height: 60,
            proj_corr_dist_thresh: 0.15,
            proj_corr_normal_thresh: 0.97,
            proj_corr_color_thresh: 0.1,
            verify_err_thresh: 0.075,
            verify_corr_thresh: 0.02,
            sensor_depth_min: 0.1,
            sensor_depth_max: 3.0,
            validator: ValidatorConfig::default(),
            ransac: RansacConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(PipelineError::Configuration(msg));
        if self.max_num_images < 2 {
            return fail(format!("max_num_images must be at least 2, got {}", self.max_num_images));
        }
        if self.max_keys_per_image == 0 || self.max_matches_raw == 0 || self.max_matches_filtered == 0 {
            return fail("key and match capacities must be non-zero".to_string());
        }
        if self.max_matches_filtered > self.max_matches_raw {
            return fail(format!(
                "max_matches_filtered ({}) exceeds max_matches_raw ({})",
                self.max_matches_filtered, self.max_matches_raw
            ));
        }
        if self.working_width == 0
            || self.working_height == 0
            || self.downsampled_width == 0
            || self.downsampled_height == 0
        {
            return fail("working and downsampled resolutions must be non-zero".to_string());
        }
        if self.sensor_depth_min >= self.sensor_depth_max {
            return fail(format!(
                "sensor depth range [{}, {}] is empty",
                self.sensor_depth_min, self.sensor_depth_max
            ));
        }
        Ok(())
    }
}
