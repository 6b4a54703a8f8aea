mod common;

use common::{pipeline, snapshot, FakeEngine};
use rgbd_pair_matcher::stateio::{save_to_file, StateHeader};
use rgbd_pair_matcher::types::ImagePair;
use rgbd_pair_matcher::{Pipeline, PipelineError, PipelineStage};

/// Runs the fake pipeline until `stage` is reached.
fn run_to(stage: PipelineStage, engine: &FakeEngine) -> Pipeline {
    let mut p = pipeline(4);
    if stage >= PipelineStage::HasRawMatches {
        p.match_all(engine).unwrap();
    }
    if stage >= PipelineStage::FilteredByGeometry {
        p.filter_by_geometry(engine).unwrap();
    }
    if stage >= PipelineStage::FilteredBySurfaceArea {
        p.filter_by_surface_area(engine).unwrap();
    }
    if stage >= PipelineStage::FilteredByDenseVerify {
        p.filter_by_dense_verify(engine).unwrap();
    }
    assert_eq!(p.stage(), stage);
    p
}

fn engine() -> FakeEngine {
    let mut engine = FakeEngine::new(9);
    engine.raw.insert(ImagePair::new(1, 2), 2);
    engine.raw.insert(ImagePair::new(0, 3), 30);
    engine.reject_surface.insert(ImagePair::new(2, 3));
    engine
}

#[test]
fn every_stage_round_trips_bit_for_bit() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine();
    for stage in &PipelineStage::ALL[1..] {
        let saved = run_to(*stage, &engine);
        let path = dir.path().join(format!("state-{}.bin", stage.as_i32()));
        saved.save_state(&path).unwrap();

        let mut loaded = pipeline(4);
        assert_eq!(loaded.load_state(&path).unwrap(), *stage);
        assert_eq!(loaded.stage(), *stage);
        assert_eq!(loaded.candidate_pairs(), saved.candidate_pairs());
        assert_eq!(snapshot(loaded.table(), 4), snapshot(saved.table(), 4), "stage {stage:?}");
        assert_eq!(loaded.filtered_pairs(), saved.filtered_pairs());
    }
}

#[test]
fn loaded_state_continues_with_the_next_pass() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.bin");
    let engine = engine();
    let mut reference = run_to(PipelineStage::FilteredByGeometry, &engine);
    reference.save_state(&path).unwrap();
    reference.filter_by_surface_area(&engine).unwrap();

    let mut resumed = pipeline(4);
    resumed.load_state(&path).unwrap();
    resumed.filter_by_surface_area(&engine).unwrap();
    assert_eq!(snapshot(resumed.table(), 4), snapshot(reference.table(), 4));
}

#[test]
fn image_count_mismatch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.bin");
    run_to(PipelineStage::HasRawMatches, &engine()).save_state(&path).unwrap();

    let mut other = pipeline(3);
    let before = snapshot(other.table(), 3);
    assert!(matches!(other.load_state(&path), Err(PipelineError::Configuration(_))));
    assert_eq!(other.stage(), PipelineStage::Initialized);
    assert_eq!(snapshot(other.table(), 3), before);
}

#[test]
fn loading_over_matches_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.bin");
    let engine = engine();
    run_to(PipelineStage::HasRawMatches, &engine).save_state(&path).unwrap();

    let mut busy = run_to(PipelineStage::HasRawMatches, &engine);
    assert!(matches!(busy.load_state(&path), Err(PipelineError::AlreadyCompleted { .. })));

    let mut fresh = Pipeline::new(common::config()).unwrap();
    assert!(matches!(fresh.load_state(&path), Err(PipelineError::StageViolation { .. })));
}

#[test]
fn uninitialized_state_file_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.bin");
    let mut p = pipeline(4);
    let header = StateHeader {
        num_images: 4,
        stage: PipelineStage::Uninitialized,
        candidate_pairs: Vec::new(),
    };
    save_to_file(&path, &header, p.table()).unwrap();

    assert!(matches!(p.load_state(&path), Err(PipelineError::Corrupt(_))));
    assert_eq!(p.stage(), PipelineStage::Initialized);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = pipeline(4);
    assert!(matches!(
        p.load_state(&dir.path().join("absent.bin")),
        Err(PipelineError::Io(_))
    ));
    assert_eq!(p.stage(), PipelineStage::Initialized);
}
