mod common;

use common::{pipeline, pipeline_with, snapshot, FakeEngine};
use rgbd_pair_matcher::buffer::MatchVariant;
use rgbd_pair_matcher::pair_index::pairs;
use rgbd_pair_matcher::types::ImagePair;
use rgbd_pair_matcher::{Pipeline, PipelineError, PipelineStage};

fn raw(p: &Pipeline, i: usize, j: usize) -> usize {
    p.table().count(MatchVariant::Raw, ImagePair::new(i, j)).unwrap()
}

fn filtered(p: &Pipeline, i: usize, j: usize) -> usize {
    p.table().count(MatchVariant::Filtered, ImagePair::new(i, j)).unwrap()
}

fn assert_narrowed(p: &Pipeline) {
    for pair in pairs(p.num_images()) {
        assert!(filtered(p, pair.i, pair.j) <= raw(p, pair.i, pair.j), "pair {pair} grew");
    }
}

#[test]
fn four_images_give_six_candidates() {
    let mut p = pipeline(4);
    let report = p.match_all(&FakeEngine::new(10)).unwrap();
    assert_eq!(p.stage(), PipelineStage::HasRawMatches);
    assert_eq!(report.pairs, 6);
    assert_eq!(p.candidate_pairs().len(), 6);
    assert_eq!(
        p.candidate_pairs(),
        &[
            ImagePair::new(0, 1),
            ImagePair::new(0, 2),
            ImagePair::new(1, 2),
            ImagePair::new(0, 3),
            ImagePair::new(1, 3),
            ImagePair::new(2, 3),
        ]
    );
}

#[test]
fn candidates_need_more_than_the_minimum() {
    let mut p = pipeline(3);
    let mut engine = FakeEngine::new(10);
    // min_num_matches is 3: exactly three is not enough
    engine.raw.insert(ImagePair::new(0, 2), 3);
    engine.raw.insert(ImagePair::new(1, 2), 4);
    p.match_all(&engine).unwrap();
    assert_eq!(p.candidate_pairs(), &[ImagePair::new(0, 1), ImagePair::new(1, 2)]);
}

#[test]
fn image_without_features_yields_empty_pairs() {
    let mut p = pipeline_with(3, &[20, 0, 20]);
    let report = p.match_all(&FakeEngine::new(10)).unwrap();
    assert_eq!(report.empty_images, 1);
    assert_eq!(raw(&p, 0, 1), 0);
    assert_eq!(raw(&p, 1, 2), 0);
    assert_eq!(raw(&p, 0, 2), 10);
    assert_eq!(p.stage(), PipelineStage::HasRawMatches);
    assert_eq!(p.candidate_pairs(), &[ImagePair::new(0, 2)]);
}

#[test]
fn raw_overflow_is_truncated() {
    let mut p = pipeline(3);
    let mut engine = FakeEngine::new(5);
    engine.raw.insert(ImagePair::new(0, 2), 40);
    let report = p.match_all(&engine).unwrap();
    assert_eq!(report.truncated_pairs, 1);
    assert_eq!(raw(&p, 0, 2), 16);
    assert_eq!(raw(&p, 1, 2), 5);
    let kept = p.table().read(MatchVariant::Raw, 0, 2).unwrap();
    assert_eq!(kept.key_indices.last().unwrap().src, 15);
}

#[test]
fn early_pass_is_rejected_and_changes_nothing() {
    let engine = FakeEngine::new(10);
    let mut p = pipeline(4);
    let err = p.filter_by_geometry(&engine).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::StageViolation { required: PipelineStage::HasRawMatches, .. }
    ));

    p.match_all(&engine).unwrap();
    let before = snapshot(p.table(), 4);
    let calls = engine.calls.get();

    for result in [p.filter_by_surface_area(&engine), p.filter_by_dense_verify(&engine)] {
        assert!(matches!(result, Err(PipelineError::StageViolation { .. })));
    }
    assert_eq!(p.stage(), PipelineStage::HasRawMatches);
    assert_eq!(engine.calls.get(), calls);
    assert_eq!(snapshot(p.table(), 4), before);
}

#[test]
fn completed_pass_cannot_rerun() {
    let engine = FakeEngine::new(10);
    let mut p = pipeline(3);
    p.match_all(&engine).unwrap();
    p.filter_by_geometry(&engine).unwrap();
    assert!(matches!(p.match_all(&engine), Err(PipelineError::AlreadyCompleted { .. })));
    assert!(matches!(p.filter_by_geometry(&engine), Err(PipelineError::AlreadyCompleted { .. })));
    assert!(matches!(
        p.set_features(vec![Default::default(); 3]),
        Err(PipelineError::AlreadyCompleted { .. })
    ));
}

#[test]
fn every_pass_only_narrows() {
    let mut engine = FakeEngine::new(10);
    engine.raw.insert(ImagePair::new(0, 1), 2);
    engine.geometry_extra = 20;
    let mut p = pipeline(4);

    p.match_all(&engine).unwrap();
    let report = p.filter_by_geometry(&engine).unwrap();
    assert_eq!(p.stage(), PipelineStage::FilteredByGeometry);
    assert_eq!(report.pairs, 6);
    assert_narrowed(&p);
    // two raw matches plus invented ones are cut back to two
    assert_eq!(filtered(&p, 0, 1), 2);
    // capped by the filtered capacity
    assert_eq!(filtered(&p, 0, 2), 6);

    engine.reject_surface.insert(ImagePair::new(1, 3));
    p.filter_by_surface_area(&engine).unwrap();
    assert_narrowed(&p);
    assert_eq!(filtered(&p, 1, 3), 0);

    let report = p.filter_by_dense_verify(&engine).unwrap();
    assert_eq!(p.stage(), PipelineStage::FilteredByDenseVerify);
    assert_eq!(report.pairs, 5);
    assert_narrowed(&p);
    assert_eq!(filtered(&p, 0, 2), 3);
    assert_eq!(filtered(&p, 0, 1), 1);

    assert_eq!(p.filtered_pairs().len(), 5);
    assert!(!p.filtered_pairs().contains(&ImagePair::new(1, 3)));
}

#[test]
fn engine_failures_are_absorbed_per_pair() {
    let mut engine = FakeEngine::new(10);
    engine.fail_match.insert(ImagePair::new(0, 2));
    let mut p = pipeline(3);

    let report = p.match_all(&engine).unwrap();
    assert_eq!(report.failed_pairs, 1);
    assert_eq!(raw(&p, 0, 2), 0);
    assert_eq!(raw(&p, 1, 2), 10);

    engine.fail_filter.insert(ImagePair::new(1, 2));
    let report = p.filter_by_geometry(&engine).unwrap();
    assert_eq!(report.failed_pairs, 1);
    assert_eq!(report.kept, 1);
    assert_eq!(filtered(&p, 1, 2), 0);
    assert_eq!(filtered(&p, 0, 1), 6);
    assert_eq!(p.stage(), PipelineStage::FilteredByGeometry);
}

#[test]
fn filtered_pairs_empty_before_filtering() {
    let mut p = pipeline(3);
    p.match_all(&FakeEngine::new(10)).unwrap();
    assert!(p.filtered_pairs().is_empty());
}

#[test]
fn too_many_images_is_fatal() {
    let mut p = Pipeline::new(common::config()).unwrap();
    let err = p.initialize(common::sensor(9)).unwrap_err();
    assert!(matches!(err, PipelineError::CapacityExceeded { requested: 9, max: 8 }));
    assert_eq!(p.stage(), PipelineStage::Uninitialized);
}

#[test]
fn detection_fills_feature_sets() {
    let mut p = Pipeline::new(common::config()).unwrap();
    p.initialize(common::sensor(3)).unwrap();
    p.detect_features(&FakeEngine::new(4)).unwrap();
    assert!(p.features()[0].is_empty());
    assert_eq!(p.features()[2].len(), 8);

    let err = p
        .detect_features(&rgbd_pair_matcher::engine::CpuEngine::default())
        .unwrap_err();
    assert!(matches!(err, PipelineError::Detection { image: 0, .. }));
}

#[test]
fn feature_count_must_match_images() {
    let mut p = Pipeline::new(common::config()).unwrap();
    p.initialize(common::sensor(3)).unwrap();
    assert!(matches!(
        p.set_features(vec![Default::default(); 2]),
        Err(PipelineError::Configuration(_))
    ));
}

#[test]
fn colour_frame_off_calibration_is_fatal() {
    let mut sensor = common::sensor(2);
    sensor.calibration.color = common::intrinsics(64, 48);
    sensor.frames[0].color.width = 64;
    sensor.frames[0].color.height = 48;
    sensor.frames[0].color.data = vec![[0, 0, 0, 255]; 64 * 48];

    let mut p = Pipeline::new(common::config()).unwrap();
    assert!(matches!(p.initialize(sensor), Err(PipelineError::Configuration(_))));
    assert_eq!(p.stage(), PipelineStage::Uninitialized);
}

#[test]
fn colour_is_resampled_to_the_working_size() {
    let mut sensor = common::sensor(2);
    sensor.calibration.color = common::intrinsics(64, 48);
    for frame in &mut sensor.frames {
        frame.color.width = 64;
        frame.color.height = 48;
        frame.color.data = vec![[10, 20, 30, 255]; 64 * 48];
    }

    let mut p = Pipeline::new(common::config()).unwrap();
    p.initialize(sensor).unwrap();
    let color = p.calibration().unwrap().color;
    assert_eq!((color.width, color.height), (common::WIDTH, common::HEIGHT));
    assert_eq!(color.fx, common::WIDTH as f32);
}
