mod common;

use common::{
    RecordingEmitter,
    synthetic_mask::{block_mask, write_mask},
    synthetic_series::{SeriesSpec, write_ct_series},
    temp_dir,
};
use nalgebra::{Matrix3, Vector3};
use nifti_rtstruct::{
    AxisFlips, CaseRequest, FailureKind, FlipPolicy, Geometry, MaskLoader, Phase, PipelineConfig,
    PipelineError, Resampler, SeriesLoader, SortBy, run_case, validator,
};
use std::path::Path;

fn request(root: &Path, case_id: &str, phase: Phase, mask_name: &str) -> CaseRequest {
    CaseRequest {
        case_id: case_id.to_string(),
        phase,
        series_dir: root.join("series"),
        mask_path: root.join(mask_name),
        output_dir: root.join("out"),
    }
}

fn close(a: &Vector3<f64>, b: &Vector3<f64>) -> bool {
    (a - b).amax() < 1e-4
}

#[test]
fn pre_phase_mask_on_coarser_slices_is_aligned_and_emitted() {
    let tmp = temp_dir("case42");
    let root = tmp.path();
    let spec = SeriesSpec::axial(8, 6, 80, 0.7, 1.0);
    write_ct_series(&root.join("series"), &spec);

    let reference = spec.geometry();
    let mask_geometry = Geometry::new(
        [8, 6, 80],
        Vector3::new(0.7, 0.7, 1.25),
        *reference.origin(),
        Matrix3::identity(),
    )
    .unwrap();
    let labels = block_mask([8, 6, 80], [2, 1, 16], [6, 5, 48], 1.0);
    write_mask(&root.join("mask.nii.gz"), &labels, &mask_geometry);

    let emitter = RecordingEmitter::default();
    let request = request(root, "42", Phase::Pre, "mask.nii.gz");
    let output = run_case(&request, &PipelineConfig::default(), &emitter).unwrap();

    let calls = emitter.calls();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.dim, (6, 8, 80));
    assert_eq!(call.flips, AxisFlips::NONE);
    assert_eq!(call.roi_name, "Pancreas");
    assert_eq!(call.output, root.join("out").join("42_PRE_RTSTRUCT.dcm"));
    // source slices 16..48 cover reference slices 20..60
    assert_eq!(call.foreground, 40 * 4 * 4);
    assert_eq!(output.foreground_voxels, call.foreground);

    let masks = emitter.masks.lock().unwrap();
    let data = masks[0].data();
    assert!(data[[1, 2, 20]]);
    assert!(!data[[1, 2, 19]]);
    assert!(data[[4, 5, 59]]);
    assert!(!data[[4, 5, 60]]);
}

#[test]
fn missing_mask_fails_without_emitting() {
    let tmp = temp_dir("case7");
    let root = tmp.path();
    write_ct_series(&root.join("series"), &SeriesSpec::axial(4, 4, 3, 1.0, 2.0));

    let emitter = RecordingEmitter::default();
    let request = request(root, "7", Phase::Post, "absent.nii.gz");
    let err = run_case(&request, &PipelineConfig::default(), &emitter).unwrap_err();

    assert!(matches!(err, PipelineError::MaskLoad { .. }));
    assert_eq!(err.kind(), FailureKind::MaskLoadError);
    assert!(emitter.calls().is_empty());
    assert!(!request.output_path().exists());
}

#[test]
fn missing_series_is_reported_before_the_mask_is_read() {
    let tmp = temp_dir("noseries");
    let root = tmp.path();
    let emitter = RecordingEmitter::default();
    let request = request(root, "3", Phase::Pre, "absent.nii.gz");
    let err = run_case(&request, &PipelineConfig::default(), &emitter).unwrap_err();

    assert_eq!(err.kind(), FailureKind::NoSeriesFound);
    assert!(emitter.calls().is_empty());
}

#[test]
fn negative_row_cosine_flips_columns_only() {
    let tmp = temp_dir("case9");
    let root = tmp.path();
    let spec = SeriesSpec {
        row_cosine: [-1.0, 0.0, 0.0],
        ..SeriesSpec::axial(8, 6, 4, 0.7, 1.0)
    };
    write_ct_series(&root.join("series"), &spec);

    let reference = spec.geometry();
    let labels = block_mask([8, 6, 4], [1, 2, 3], [2, 3, 4], 1.0);
    write_mask(&root.join("mask.nii"), &labels, &reference);

    let config = PipelineConfig {
        sort_by: SortBy::InstanceNumber,
        ..PipelineConfig::default()
    };
    let emitter = RecordingEmitter::default();
    let request = request(root, "9", Phase::Pre, "mask.nii");
    let output = run_case(&request, &config, &emitter).unwrap();

    assert_eq!(output.flips, AxisFlips([true, false, false]));
    let masks = emitter.masks.lock().unwrap();
    let mask = &masks[0];
    assert_eq!(mask.foreground_count(), 1);
    // column 1 of 8 is mirrored to column 6
    assert!(mask.data()[[2, 6, 3]]);
    assert_eq!(mask.source_index(2, 6, 3), [1, 2, 3]);
    let expected = reference.index_to_physical(&Vector3::new(1.0, 2.0, 3.0));
    assert!(close(&mask.physical_point(2, 6, 3), &expected));
}

#[test]
fn forced_flip_policy_overrides_direction() {
    let tmp = temp_dir("forced");
    let root = tmp.path();
    let spec = SeriesSpec::axial(4, 4, 2, 1.0, 1.0);
    write_ct_series(&root.join("series"), &spec);
    let labels = block_mask([4, 4, 2], [0, 0, 0], [1, 1, 1], 1.0);
    write_mask(&root.join("mask.nii"), &labels, &spec.geometry());

    let config = PipelineConfig {
        flip_policy: FlipPolicy::Forced {
            axes: AxisFlips([false, true, false]),
        },
        ..PipelineConfig::default()
    };
    let emitter = RecordingEmitter::default();
    let output = run_case(&request(root, "5", Phase::Post, "mask.nii"), &config, &emitter)
        .unwrap();

    assert_eq!(output.flips, AxisFlips([false, true, false]));
    assert!(emitter.masks.lock().unwrap()[0].data()[[3, 0, 0]]);
}

#[test]
fn oblique_series_is_rejected_before_emitting() {
    let tmp = temp_dir("oblique");
    let root = tmp.path();
    let angle = 60f64.to_radians();
    let spec = SeriesSpec {
        row_cosine: [angle.cos(), angle.sin(), 0.0],
        column_cosine: [-angle.sin(), angle.cos(), 0.0],
        ..SeriesSpec::axial(6, 6, 3, 1.0, 1.0)
    };
    write_ct_series(&root.join("series"), &spec);
    let labels = block_mask([6, 6, 3], [2, 2, 0], [4, 4, 3], 1.0);
    write_mask(&root.join("mask.nii"), &labels, &spec.geometry());

    let emitter = RecordingEmitter::default();
    let err = run_case(
        &request(root, "11", Phase::Pre, "mask.nii"),
        &PipelineConfig::default(),
        &emitter,
    )
    .unwrap_err();

    assert_eq!(err.kind(), FailureKind::UnsupportedOrientation);
    assert!(emitter.calls().is_empty());
}

#[test]
fn resampling_keeps_labels_and_lands_on_the_reference_grid() {
    let tmp = temp_dir("labels");
    let root = tmp.path();
    let spec = SeriesSpec::axial(10, 8, 12, 0.8, 1.5);
    write_ct_series(&root.join("series"), &spec);

    let series = SeriesLoader::load_from_directory(root.join("series"), SortBy::default()).unwrap();
    let loaded = series.volume.geometry();
    let expected = spec.geometry();
    assert_eq!(loaded.dimensions(), [10, 8, 12]);
    assert!(close(loaded.origin(), expected.origin()));
    assert!(close(loaded.spacing(), expected.spacing()));
    assert!((loaded.direction() - expected.direction()).amax() < 1e-6);
    assert_eq!(series.slices.len(), 12);

    let mask_geometry = Geometry::new(
        [16, 13, 9],
        Vector3::new(0.5, 0.5, 2.0),
        *expected.origin(),
        Matrix3::identity(),
    )
    .unwrap();
    let mut labels = block_mask([16, 13, 9], [2, 2, 1], [8, 8, 5], 1.0);
    labels
        .slice_mut(ndarray::s![9..14, 3..10, 4..8])
        .fill(2.0);
    write_mask(&root.join("labels.nii.gz"), &labels, &mask_geometry);

    let mask = MaskLoader::load(root.join("labels.nii.gz"), 0.5).unwrap();
    let reference = series.reference_geometry();
    let resampled = Resampler::resample(&mask, &reference).unwrap();

    assert_eq!(resampled.geometry(), reference.geometry());
    assert!(validator::validate(&reference, &resampled, validator::DEFAULT_TOLERANCE).is_ok());
    let values = resampled.distinct_values();
    assert!(values.iter().all(|v| [0.0, 1.0, 2.0].contains(v)));
    assert!(values.contains(&2.0));
}

#[test]
fn empty_mask_is_a_mask_load_error() {
    let tmp = temp_dir("empty");
    let root = tmp.path();
    let spec = SeriesSpec::axial(4, 4, 2, 1.0, 1.0);
    write_ct_series(&root.join("series"), &spec);
    let labels = block_mask([4, 4, 2], [0, 0, 0], [0, 0, 0], 1.0);
    write_mask(&root.join("mask.nii"), &labels, &spec.geometry());

    let emitter = RecordingEmitter::default();
    let err = run_case(
        &request(root, "13", Phase::Pre, "mask.nii"),
        &PipelineConfig::default(),
        &emitter,
    )
    .unwrap_err();
    assert_eq!(err.kind(), FailureKind::MaskLoadError);
    assert!(emitter.calls().is_empty());
}
