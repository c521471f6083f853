//! # NIfTI-RTSTRUCT library
//!
//! This crate turns organ segmentation masks stored as NIfTI label volumes
//! into DICOM RT Structure Sets referencing the CT series they were drawn on.
//!
//! It builds on the dicom-rs ecosystem for reading the reference series and
//! writing the structure set, and on nifti-rs for reading masks.
//! A case runs through a fixed sequence of stages:
//!  - load the reference series (slices decoded in parallel using rayon)
//!  - load the mask and bring its affine into the DICOM patient frame
//!  - resample the mask onto the reference grid (nearest neighbour)
//!  - check the resampled geometry against the reference
//!  - transpose and flip into row-column-slice order
//!  - emit contours through a [`ContourEmitter`]
//!
//!  A mask only reaches the emitter after passing the alignment check, so a
//!  half-aligned structure set is never written. Masks are assumed to hold:
//!   - a single 3D volume (a 4D file with one time point is accepted)
//!   - an axis-aligned orientation (oblique grids are rejected)
//!
//! Many cases can be run at once with [`batch::run_batch`] on a bounded
//! worker pool.
//!
//! # Examples
//!
//! ## Converting a single case
//!
//! ```no_run
//! # use nifti_rtstruct::{CaseRequest, PipelineConfig, RtStructEmitter, Phase, run_case};
//! # use std::path::PathBuf;
//! let request = CaseRequest {
//!     case_id: "42".to_string(),
//!     phase: Phase::Pre,
//!     series_dir: PathBuf::from("data/42/PRE/CT"),
//!     mask_path: PathBuf::from("masks/42_PRE.nii.gz"),
//!     output_dir: PathBuf::from("out"),
//! };
//! let config = PipelineConfig::default();
//! let output = run_case(&request, &config, &RtStructEmitter::default())
//!     .expect("should have written a structure set");
//! println!("{}", output.output_path.display());
//! ```

pub mod batch;
pub mod config;
pub mod emitter;
pub mod enums;
pub mod geometry;
pub mod mask_loader;
pub mod pipeline;
pub mod reconciler;
pub mod resampler;
pub mod series_loader;
pub mod validator;
pub mod volume;

pub use batch::{BatchReport, run_batch};
pub use config::{BatchConfig, PathLayout, PipelineConfig};
pub use emitter::{ContourEmitter, EmitterError, RtStructEmitter};
pub use enums::{AxisFlips, FlipPolicy, Phase, SortBy};
pub use geometry::{Geometry, ReferenceGeometry};
pub use mask_loader::MaskLoader;
pub use pipeline::{CaseOutput, CaseRequest, FailureKind, PipelineError, run_case};
pub use reconciler::{AlignedMask, AxisReconciler};
pub use resampler::Resampler;
pub use series_loader::{DicomSeries, SeriesLoader};
pub use validator::{AlignmentError, ValidatedGrid};
pub use volume::VoxelGrid;
