use crate::{
    enums::{FlipPolicy, Phase, SortBy},
    pipeline::CaseRequest,
    reconciler::DEFAULT_THRESHOLD,
    validator::DEFAULT_TOLERANCE,
};

use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Settings consumed by a single case run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Mask voxels strictly above this value belong to the ROI.
    pub threshold: f32,
    /// Absolute tolerance of the alignment check.
    pub tolerance: f64,
    pub roi_name: String,
    pub flip_policy: FlipPolicy,
    pub sort_by: SortBy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            tolerance: DEFAULT_TOLERANCE,
            roi_name: "Pancreas".to_string(),
            flip_policy: FlipPolicy::default(),
            sort_by: SortBy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.threshold.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "threshold must be finite, got {}",
                self.threshold
            )));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.roi_name.trim().is_empty() {
            return Err(ConfigError::Invalid("roi_name must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Where to find the inputs of a case; `{case}` and `{phase}` are substituted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathLayout {
    /// e.g. `data/{case}/{phase}/CT`
    pub series_dir: String,
    /// e.g. `masks/{case}_{phase}.nii.gz`
    pub mask_file: String,
}

impl PathLayout {
    pub fn series_dir(&self, case_id: &str, phase: Phase) -> PathBuf {
        PathBuf::from(expand(&self.series_dir, case_id, phase))
    }

    pub fn mask_file(&self, case_id: &str, phase: Phase) -> PathBuf {
        PathBuf::from(expand(&self.mask_file, case_id, phase))
    }
}

fn expand(template: &str, case_id: &str, phase: Phase) -> String {
    template
        .replace("{case}", case_id)
        .replace("{phase}", &phase.to_string())
}

fn all_phases() -> Vec<Phase> {
    vec![Phase::Pre, Phase::Post]
}

fn default_concurrency() -> usize {
    rayon::current_num_threads()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub layout: PathLayout,
    pub output_dir: PathBuf,
    pub cases: Vec<String>,
    #[serde(default = "all_phases")]
    pub phases: Vec<Phase>,
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,
    /// Defaults to `report.json` in `output_dir`.
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.validate()?;
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.cases.is_empty() {
            return Err(ConfigError::Invalid("no cases listed".to_string()));
        }
        Ok(())
    }

    /// One request per case and phase, in listing order.
    pub fn requests(&self) -> Vec<CaseRequest> {
        self.cases
            .iter()
            .flat_map(|case_id| {
                self.phases.iter().map(move |&phase| CaseRequest {
                    case_id: case_id.clone(),
                    phase,
                    series_dir: self.layout.series_dir(case_id, phase),
                    mask_path: self.layout.mask_file(case_id, phase),
                    output_dir: self.output_dir.clone(),
                })
            })
            .collect()
    }

    pub fn report_path(&self) -> PathBuf {
        self.report_path
            .clone()
            .unwrap_or_else(|| self.output_dir.join("report.json"))
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_pipeline_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let config: PipelineConfig = read_json(path)?;
    config.validate()?;
    Ok(config)
}

pub fn load_batch_config(path: &Path) -> Result<BatchConfig, ConfigError> {
    let config: BatchConfig = read_json(path)?;
    config.validate()?;
    Ok(config)
}
