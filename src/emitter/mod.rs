//! Persistence boundary: turn an [`AlignedMask`] into a structure file.
//!
//! The pipeline only ever hands an emitter a mask that passed the alignment
//! gate. [`RtStructEmitter`] is the default implementation; tests and other
//! callers can plug in their own through [`ContourEmitter`].

pub mod contour;
pub mod rtstruct;

use crate::reconciler::AlignedMask;

use std::path::{Path, PathBuf};
use thiserror::Error;

pub use rtstruct::RtStructEmitter;

/// Failure raised by an emitter, passed through the pipeline opaquely.
#[derive(Debug, Error)]
#[error("EmitterError: {0}")]
pub struct EmitterError(#[source] pub Box<dyn std::error::Error + Send + Sync>);

impl EmitterError {
    pub fn new(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(error.into())
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Self(message.into().into())
    }
}

pub trait ContourEmitter: Send + Sync {
    /// Persist `mask` as one named region referencing the series in
    /// `series_dir`, written to `output`. Returns the written path.
    fn emit(
        &self,
        mask: &AlignedMask,
        series_dir: &Path,
        roi_name: &str,
        output: &Path,
    ) -> Result<PathBuf, EmitterError>;
}
