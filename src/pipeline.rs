//! One case, one phase: series and mask in, structure set out.
//!
//! Stages run strictly in order and the first failure aborts the case:
//!
//! 1. load the reference series
//! 2. load the mask
//! 3. resample the mask onto the reference grid
//! 4. gate on alignment
//! 5. reconcile axes
//! 6. emit
//!
//! The emitter never sees a mask that failed the gate.

use crate::{
    config::PipelineConfig,
    emitter::{ContourEmitter, EmitterError},
    enums::{AxisFlips, Phase},
    mask_loader::{MaskLoader, MaskLoaderError},
    reconciler::{AxisReconciler, ReconcileError},
    resampler::{ResampleError, Resampler},
    series_loader::{SeriesLoader, SeriesLoaderError},
    validator::{self, AlignmentError},
};

use serde::Serialize;
use std::{
    fmt,
    path::{Path, PathBuf},
    time::Instant,
};
use thiserror::Error;
use tracing::{debug, info, info_span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseRequest {
    pub case_id: String,
    pub phase: Phase,
    pub series_dir: PathBuf,
    pub mask_path: PathBuf,
    pub output_dir: PathBuf,
}

impl CaseRequest {
    pub fn output_file_name(&self) -> String {
        format!("{}_{}_RTSTRUCT.dcm", self.case_id, self.phase)
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(self.output_file_name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseOutput {
    pub case_id: String,
    pub phase: Phase,
    pub output_path: PathBuf,
    pub foreground_voxels: usize,
    pub flips: AxisFlips,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("NoSeriesFound: {path}: {source}")]
    NoSeriesFound {
        path: PathBuf,
        #[source]
        source: SeriesLoaderError,
    },

    #[error("MaskLoadError: {path}: {source}")]
    MaskLoad {
        path: PathBuf,
        #[source]
        source: MaskLoaderError,
    },

    #[error("ResampleError: {0}")]
    Resample(#[from] ResampleError),

    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    #[error(transparent)]
    Orientation(#[from] ReconcileError),

    #[error(transparent)]
    Emitter(#[from] EmitterError),
}

/// Coarse failure category, as reported per case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    NoSeriesFound,
    MaskLoadError,
    ResampleError,
    DimensionMismatch,
    OriginMismatch,
    SpacingMismatch,
    DirectionMismatch,
    UnsupportedOrientation,
    EmitterError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::NoSeriesFound { .. } => FailureKind::NoSeriesFound,
            PipelineError::MaskLoad { .. } => FailureKind::MaskLoadError,
            PipelineError::Resample(_) => FailureKind::ResampleError,
            PipelineError::Alignment(e) => match e {
                AlignmentError::DimensionMismatch { .. } => FailureKind::DimensionMismatch,
                AlignmentError::OriginMismatch { .. } => FailureKind::OriginMismatch,
                AlignmentError::SpacingMismatch { .. } => FailureKind::SpacingMismatch,
                AlignmentError::DirectionMismatch { .. } => FailureKind::DirectionMismatch,
            },
            PipelineError::Orientation(_) => FailureKind::UnsupportedOrientation,
            PipelineError::Emitter(_) => FailureKind::EmitterError,
        }
    }
}

/// Run every stage for one request.
///
/// # Errors
///
/// Returns the first stage failure; later stages are not attempted
pub fn run_case(
    request: &CaseRequest,
    config: &PipelineConfig,
    emitter: &dyn ContourEmitter,
) -> Result<CaseOutput, PipelineError> {
    let _span = info_span!("case", id = %request.case_id, phase = %request.phase).entered();
    let started = Instant::now();

    let series = SeriesLoader::load_from_directory(&request.series_dir, config.sort_by)
        .map_err(|source| PipelineError::NoSeriesFound {
            path: request.series_dir.clone(),
            source,
        })?;
    let reference = series.reference_geometry();
    debug!("series loaded after {:?}", started.elapsed());

    let mask = MaskLoader::load(&request.mask_path, config.threshold).map_err(|source| {
        PipelineError::MaskLoad {
            path: request.mask_path.clone(),
            source,
        }
    })?;
    debug!("mask loaded after {:?}", started.elapsed());

    let resampled = Resampler::resample(&mask, &reference)?;
    let validated = validator::gate(&reference, resampled, config.tolerance)?;
    let aligned = AxisReconciler::new(config.flip_policy, config.threshold).reconcile(&validated)?;
    info!(
        "aligned mask {:?}, {} foreground voxels, flipped {}",
        aligned.dim(),
        aligned.foreground_count(),
        aligned.flips()
    );

    let output_path = request.output_path();
    let written = emitter.emit(&aligned, &request.series_dir, &config.roi_name, &output_path)?;
    info!("wrote {} in {:?}", written.display(), started.elapsed());

    Ok(CaseOutput {
        case_id: request.case_id.clone(),
        phase: request.phase,
        output_path: written,
        foreground_voxels: aligned.foreground_count(),
        flips: aligned.flips(),
    })
}

/// One line summarising the outcome of a request.
pub fn outcome_line(request: &CaseRequest, outcome: &Result<CaseOutput, PipelineError>) -> String {
    match outcome {
        Ok(output) => success_line(&request.case_id, request.phase, &output.output_path),
        Err(e) => failure_line(&request.case_id, request.phase, e),
    }
}

pub fn success_line(case_id: &str, phase: Phase, output: &Path) -> String {
    format!("{case_id} {phase}: OK {}", output.display())
}

pub fn failure_line(case_id: &str, phase: Phase, reason: &dyn fmt::Display) -> String {
    format!("{case_id} {phase}: FAILED {reason}")
}
