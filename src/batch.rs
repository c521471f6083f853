//! Bounded parallel execution of independent case requests.

use crate::{
    config::PipelineConfig,
    emitter::ContourEmitter,
    enums::Phase,
    pipeline::{self, CaseOutput, CaseRequest, FailureKind, PipelineError},
};

use rayon::prelude::*;
use serde::Serialize;
use std::{collections::HashSet, fs, path::Path};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Case {case_id} {phase} is requested more than once")]
    DuplicateRequest { case_id: String, phase: Phase },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseFailure {
    pub case_id: String,
    pub phase: Phase,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of a batch, in request order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<CaseOutput>,
    pub failed: Vec<CaseFailure>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn write_json(&self, path: &Path) -> Result<(), BatchError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Two requests for the same case and phase would race on one output file.
fn check_unique(requests: &[CaseRequest]) -> Result<(), BatchError> {
    let mut seen = HashSet::new();
    for request in requests {
        if !seen.insert((request.case_id.as_str(), request.phase)) {
            return Err(BatchError::DuplicateRequest {
                case_id: request.case_id.clone(),
                phase: request.phase,
            });
        }
    }
    Ok(())
}

/// Run `requests` on at most `max_concurrency` worker threads.
///
/// A failing case is recorded in the report and never stops the others.
///
/// # Errors
///
/// Returns error if requests are duplicated or the pool cannot be started
pub fn run_batch(
    requests: &[CaseRequest],
    config: &PipelineConfig,
    emitter: &dyn ContourEmitter,
    max_concurrency: usize,
) -> Result<BatchReport, BatchError> {
    check_unique(requests)?;
    for dir in requests
        .iter()
        .map(|r| r.output_dir.as_path())
        .collect::<HashSet<_>>()
    {
        fs::create_dir_all(dir)?;
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_concurrency.max(1))
        .thread_name(|i| format!("case-worker-{i}"))
        .build()?;
    info!(
        "running {} requests on {} workers",
        requests.len(),
        pool.current_num_threads()
    );

    let outcomes: Vec<Result<CaseOutput, PipelineError>> = pool.install(|| {
        requests
            .par_iter()
            .map(|request| {
                let outcome = pipeline::run_case(request, config, emitter);
                if outcome.is_err() {
                    error!("{}", pipeline::outcome_line(request, &outcome));
                }
                outcome
            })
            .collect()
    });

    let mut report = BatchReport::default();
    for (request, outcome) in requests.iter().zip(outcomes) {
        match outcome {
            Ok(output) => report.succeeded.push(output),
            Err(e) => report.failed.push(CaseFailure {
                case_id: request.case_id.clone(),
                phase: request.phase,
                kind: e.kind(),
                message: e.to_string(),
            }),
        }
    }
    info!(
        "batch finished: {} succeeded, {} failed",
        report.succeeded.len(),
        report.failed.len()
    );
    Ok(report)
}
