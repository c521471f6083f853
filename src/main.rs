//! Command line front end: convert one case or a whole batch.

use clap::{Parser, Subcommand};
use nifti_rtstruct::{
    batch::{self, BatchError},
    config::{self, ConfigError, PipelineConfig},
    emitter::RtStructEmitter,
    enums::{AxisFlips, FlipPolicy, Phase},
    pipeline::{self, CaseRequest},
};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{Level, error};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a single case and phase
    Case {
        /// Directory holding the reference CT series
        #[arg(long)]
        series: PathBuf,
        /// NIfTI mask (.nii or .nii.gz)
        #[arg(long)]
        mask: PathBuf,
        #[arg(long)]
        output_dir: PathBuf,
        #[arg(long)]
        case_id: String,
        #[arg(long, value_enum)]
        phase: Phase,
        /// JSON pipeline settings; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        threshold: Option<f32>,
        #[arg(long)]
        tolerance: Option<f64>,
        #[arg(long)]
        roi_name: Option<String>,
        /// Legacy mode: always flip these axes, e.g. `y` or `x,z`
        #[arg(long)]
        forced_flip: Option<AxisFlips>,
    },
    /// Convert every case and phase listed in a batch config
    Batch {
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} of {1} requests failed")]
    Failed(usize, usize),
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    if let Err(e) = tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .finish(),
    ) {
        eprintln!("[ERROR] Could not set up global logging subscriber: {e}");
    }

    if let Err(e) = run(args.command) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Case {
            series,
            mask,
            output_dir,
            case_id,
            phase,
            config,
            threshold,
            tolerance,
            roi_name,
            forced_flip,
        } => {
            let mut settings = match config {
                Some(path) => config::load_pipeline_config(&path)?,
                None => PipelineConfig::default(),
            };
            if let Some(threshold) = threshold {
                settings.threshold = threshold;
            }
            if let Some(tolerance) = tolerance {
                settings.tolerance = tolerance;
            }
            if let Some(roi_name) = roi_name {
                settings.roi_name = roi_name;
            }
            if let Some(axes) = forced_flip {
                settings.flip_policy = FlipPolicy::Forced { axes };
            }
            settings.validate()?;

            let request = CaseRequest {
                case_id,
                phase,
                series_dir: series,
                mask_path: mask,
                output_dir,
            };
            std::fs::create_dir_all(&request.output_dir)?;
            let emitter = RtStructEmitter::default();
            let outcome = pipeline::run_case(&request, &settings, &emitter);
            println!("{}", pipeline::outcome_line(&request, &outcome));
            if outcome.is_err() {
                return Err(CliError::Failed(1, 1));
            }
        }
        Command::Batch { config } => {
            let batch_config = config::load_batch_config(&config)?;
            let requests = batch_config.requests();
            let emitter = RtStructEmitter::default();
            let report = batch::run_batch(
                &requests,
                &batch_config.pipeline,
                &emitter,
                batch_config.max_concurrency,
            )?;

            for output in &report.succeeded {
                println!(
                    "{}",
                    pipeline::success_line(&output.case_id, output.phase, &output.output_path)
                );
            }
            for failure in &report.failed {
                println!(
                    "{}",
                    pipeline::failure_line(&failure.case_id, failure.phase, &failure.message)
                );
            }
            report.write_json(&batch_config.report_path())?;

            if !report.is_success() {
                return Err(CliError::Failed(report.failed.len(), requests.len()));
            }
        }
    }
    Ok(())
}
