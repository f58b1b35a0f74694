//! lintel: structural validation worker and CLI.
//!
//! Three modes:
//!
//! - `validate`: one-shot validation of a baseline/candidate pair,
//!   printing the summary as JSON. Exit code 1 when the run did not
//!   pass.
//! - `worker`: run the worker pool over a JSON job manifest whose
//!   candidates were pre-rendered by the generation fleet.
//! - `mask`: dump the structural mask of an image as a PNG for
//!   offline inspection.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lintel_pipeline::{
    EnhanceJob, HintClassifier, InMemorySource, JobId, JobOptions, JobState, Orchestrator,
    PrecomputedGenerator, StageAwareConfig, ValidateParams, ValidationRunner, WorkerPool,
};
use lintel_validate::{MaskExtractor, MaskExtractorKind, StageId, ValidationMode, grayscale};
use serde::Deserialize;

/// Structural drift validation for AI-enhanced property photos.
#[derive(Parser)]
#[command(name = "lintel", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate one baseline/candidate pair and print the summary.
    Validate {
        /// Baseline image path.
        baseline: PathBuf,

        /// Candidate image path.
        candidate: PathBuf,

        /// Pipeline stage whose policy applies.
        #[arg(long, value_enum, default_value_t = Stage::Stage1A)]
        stage: Stage,

        /// Override the resolved mode.
        #[arg(long, value_enum)]
        mode: Option<Mode>,

        /// Scene label (e.g. interior, exterior).
        #[arg(long)]
        scene: Option<String>,

        /// Job id for mask caching and artifact naming.
        #[arg(long)]
        job_id: Option<String>,
    },

    /// Process a JSON job manifest through the worker pool.
    Worker {
        /// Manifest file: an array of jobs with pre-rendered
        /// candidate paths per stage.
        jobs: PathBuf,

        /// Override the configured worker count.
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Write an image's structural mask as a PNG.
    Mask {
        /// Input image path.
        image: PathBuf,

        /// Output PNG path.
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// CLI-facing stage names.
#[derive(Clone, Copy, ValueEnum)]
enum Stage {
    #[value(name = "stage1A", alias = "stage1a")]
    Stage1A,
    #[value(name = "stage1B", alias = "stage1b")]
    Stage1B,
    #[value(name = "stage2")]
    Stage2,
}

impl From<Stage> for StageId {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Stage1A => Self::Stage1A,
            Stage::Stage1B => Self::Stage1B,
            Stage::Stage2 => Self::Stage2,
        }
    }
}

/// CLI-facing mode names.
#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Log,
    Block,
}

impl From<Mode> for ValidationMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Log => Self::Log,
            Mode::Block => Self::Block,
        }
    }
}

/// One manifest entry: an enhance job plus its pre-rendered outputs.
#[derive(Deserialize)]
struct JobSpec {
    id: String,
    original: PathBuf,
    #[serde(default)]
    options: JobOptions,
    #[serde(default)]
    scene_hint: Option<String>,
    #[serde(default)]
    candidates: HashMap<StageId, PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = Arc::new(StageAwareConfig::global().clone());

    match cli.command {
        Command::Validate {
            baseline,
            candidate,
            stage,
            mode,
            scene,
            job_id,
        } => {
            let runner = ValidationRunner::new(config);
            let params = ValidateParams {
                stage: stage.into(),
                baseline,
                candidate,
                mode: mode.map(Into::into),
                scene,
                job_id: job_id.map(JobId::new),
                config: None,
            };
            let summary = runner.validate(&params);
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(if summary.passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Command::Worker { jobs, workers } => {
            let manifest = std::fs::read_to_string(&jobs)
                .with_context(|| format!("reading job manifest {}", jobs.display()))?;
            let specs: Vec<JobSpec> =
                serde_json::from_str(&manifest).context("parsing job manifest")?;

            let mut generator = PrecomputedGenerator::new();
            let mut queue = Vec::with_capacity(specs.len());
            for spec in specs {
                let id = JobId::new(spec.id);
                for (stage, path) in spec.candidates {
                    generator.insert(id.clone(), stage, path);
                }
                queue.push(EnhanceJob {
                    id,
                    original: spec.original,
                    options: spec.options,
                    scene_hint: spec.scene_hint,
                });
            }

            let worker_count = workers.unwrap_or(config.worker_count).max(1);
            let timeout = Duration::from_secs(config.job_timeout_secs);
            let orchestrator = Arc::new(Orchestrator::new(
                Arc::clone(&config),
                Arc::new(generator),
                Arc::new(HintClassifier),
            ));
            let source = Arc::new(InMemorySource::new(queue));

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_time()
                .build()
                .context("building tokio runtime")?;
            let records = runtime.block_on(
                WorkerPool::new(worker_count, timeout).run(source, orchestrator),
            );

            println!("{}", serde_json::to_string_pretty(&records)?);
            let all_complete = records.iter().all(|r| r.state == JobState::Complete);
            Ok(if all_complete {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Command::Mask { image, output } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading {}", image.display()))?;
            let gray = grayscale::decode_and_grayscale(&bytes)
                .with_context(|| format!("decoding {}", image.display()))?;
            let mask = MaskExtractorKind::default()
                .extract(&gray)
                .context("extracting structural mask")?;

            let visual = image::GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
                image::Luma([if mask.bits().get(x, y) { 255 } else { 0 }])
            });
            visual
                .save(&output)
                .with_context(|| format!("writing {}", output.display()))?;
            println!(
                "mask: {}x{}, {:.2}% of image area -> {}",
                mask.width(),
                mask.height(),
                mask.area_fraction() * 100.0,
                output.display()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}
