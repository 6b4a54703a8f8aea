use anyhow::Context;
use clap::Parser;
use itertools::Itertools;
use tracing::{info, warn};

use rgbd_pair_matcher::dataset::{read_keypoints, read_sensor};
use rgbd_pair_matcher::engine::CpuEngine;
use rgbd_pair_matcher::{logging, Pipeline, PipelineConfig, PipelineStage};

mod cli;
use cli::{Args, StateMode, Until};

fn save(pipeline: &Pipeline, mode: &StateMode) -> anyhow::Result<()> {
    if let Some(path) = mode.save_path() {
        pipeline
            .save_state(path)
            .with_context(|| format!("saving state to {}", path.display()))?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level)?;

    let config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let engine = CpuEngine::new(config.ransac.clone());
    let mut pipeline = Pipeline::new(config)?;

    let selection = args.selection();
    let sensor = read_sensor(&args.sensor, &selection)
        .with_context(|| format!("reading sensor file {}", args.sensor.display()))?;
    pipeline.initialize(sensor)?;

    // the key point file covers the whole recording
    let features = read_keypoints(&args.keys)
        .with_context(|| format!("reading key points {}", args.keys.display()))?;
    pipeline.set_features(selection.select(features)?)?;

    let mode = args.mode();
    let mut resumed = false;
    if let StateMode::Resume(path) = &mode {
        match pipeline.load_state(path) {
            Ok(stage) => {
                info!("resuming from {stage:?}");
                resumed = true;
            }
            Err(e) => warn!("could not load {}: {e}; recomputing", path.display()),
        }
    } else if let Some(path) = &args.state {
        warn!("no state file at {}; computing from scratch", path.display());
    }

    if !resumed || pipeline.stage() < PipelineStage::HasRawMatches {
        let report = pipeline.match_all(&engine)?;
        info!("{} candidate pairs", report.candidates.len());
        save(&pipeline, &mode)?;
    }

    let passes = [
        (Until::Geometry, PipelineStage::FilteredByGeometry),
        (Until::SurfaceArea, PipelineStage::FilteredBySurfaceArea),
        (Until::DenseVerify, PipelineStage::FilteredByDenseVerify),
    ];
    for (pass, produces) in passes {
        if args.until < pass || pipeline.stage() >= produces {
            continue;
        }
        match pass {
            Until::Geometry => pipeline.filter_by_geometry(&engine)?,
            Until::SurfaceArea => pipeline.filter_by_surface_area(&engine)?,
            Until::DenseVerify => pipeline.filter_by_dense_verify(&engine)?,
            Until::Match => continue,
        };
        save(&pipeline, &mode)?;
    }

    let accepted = pipeline.filtered_pairs();
    info!(
        "{:?}: {} of {} candidate pairs accepted",
        pipeline.stage(),
        accepted.len(),
        pipeline.candidate_pairs().len()
    );

    if args.validate {
        let report = pipeline.validate()?;
        println!(
            "evaluated {} pairs: {} accepted, {} false positives, {} false negatives, {} without ground truth",
            report.evaluated,
            report.accepted,
            report.false_positives.len(),
            report.false_negatives.len(),
            report.missing_ground_truth.len()
        );
        if !report.false_positives.is_empty() {
            println!("false positives: {}", report.false_positives.iter().join(", "));
        }
        if !report.false_negatives.is_empty() {
            println!("false negatives: {}", report.false_negatives.iter().join(", "));
        }
    }
    Ok(())
}
