#![allow(dead_code)]

pub mod synthetic_mask;
pub mod synthetic_series;

use nifti_rtstruct::{AlignedMask, AxisFlips, ContourEmitter, EmitterError};
use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};
use tempfile::TempDir;

/// Fresh directory under the system temp dir, removed when dropped.
pub fn temp_dir(name: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(&format!("nifti-rtstruct-{name}-"))
        .tempdir()
        .expect("should have created temp dir")
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmitCall {
    pub output: PathBuf,
    pub roi_name: String,
    pub dim: (usize, usize, usize),
    pub flips: AxisFlips,
    pub foreground: usize,
}

/// Emitter that records what it was given and writes nothing.
#[derive(Default)]
pub struct RecordingEmitter {
    calls: Mutex<Vec<EmitCall>>,
    pub masks: Mutex<Vec<AlignedMask>>,
}

impl RecordingEmitter {
    pub fn calls(&self) -> Vec<EmitCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl ContourEmitter for RecordingEmitter {
    fn emit(
        &self,
        mask: &AlignedMask,
        _series_dir: &Path,
        roi_name: &str,
        output: &Path,
    ) -> Result<PathBuf, EmitterError> {
        self.calls.lock().unwrap().push(EmitCall {
            output: output.to_path_buf(),
            roi_name: roi_name.to_string(),
            dim: mask.dim(),
            flips: mask.flips(),
            foreground: mask.foreground_count(),
        });
        self.masks.lock().unwrap().push(mask.clone());
        Ok(output.to_path_buf())
    }
}
