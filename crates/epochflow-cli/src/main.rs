//! epochflow CLI: run, validate and explain YAML pipelines.

use clap::{Parser, Subcommand};
use epochflow_core::config::EngineConfig;
use epochflow_core::hash::hash_serde;
use epochflow_planner::{build_tree, parse_yaml_pipeline, ParsedPipeline};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "epochflow")]
#[command(about = "epochflow: pull-based streaming dataflow with epoch control", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a pipeline from a YAML file
    Run {
        /// Path to the pipeline YAML file
        #[arg(short, long)]
        pipeline: PathBuf,

        #[command(flatten)]
        overrides: CliOverrides,

        /// Print the run manifest as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a pipeline YAML file (parse, build and prepare the tree)
    Validate {
        /// Path to the pipeline YAML file
        #[arg(short, long)]
        pipeline: PathBuf,

        #[command(flatten)]
        overrides: CliOverrides,
    },

    /// Show the prepared execution tree for a pipeline
    Explain {
        /// Path to the pipeline YAML file
        #[arg(short, long)]
        pipeline: PathBuf,

        #[command(flatten)]
        overrides: CliOverrides,

        /// Include connector and leaf details
        #[arg(short, long)]
        verbose: bool,
    },
}

/// Engine settings given on the command line. They win over the pipeline
/// file, which wins over the environment.
#[derive(clap::Args, Debug, Default, Clone)]
struct CliOverrides {
    /// Per-lane connector capacity
    #[arg(long)]
    queue_size: Option<usize>,

    /// Default worker count for threaded operators
    #[arg(long)]
    workers: Option<usize>,

    /// Rows per generated buffer
    #[arg(long)]
    rows_per_buffer: Option<usize>,

    /// Seed recorded in the manifest
    #[arg(long)]
    seed: Option<u64>,
}

impl CliOverrides {
    fn apply_to(&self, cfg: &mut EngineConfig) {
        if let Some(v) = self.queue_size {
            cfg.connector_queue_size = v;
        }
        if let Some(v) = self.workers {
            cfg.num_parallel_workers = v;
        }
        if let Some(v) = self.rows_per_buffer {
            cfg.rows_per_buffer = v;
        }
        if self.seed.is_some() {
            cfg.seed = self.seed;
        }
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            pipeline,
            overrides,
            json,
        } => {
            if let Err(e) = run_pipeline(&pipeline, &overrides, json) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Validate {
            pipeline,
            overrides,
        } => {
            if let Err(e) = validate_pipeline(&pipeline, &overrides) {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
            println!("✓ Pipeline is valid");
        }
        Commands::Explain {
            pipeline,
            overrides,
            verbose,
        } => {
            if let Err(e) = explain_pipeline(&pipeline, &overrides, verbose) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn load(
    pipeline_path: &Path,
    overrides: &CliOverrides,
) -> Result<(ParsedPipeline, EngineConfig), Box<dyn std::error::Error>> {
    let yaml_content = fs::read_to_string(pipeline_path)?;
    let parsed = parse_yaml_pipeline(&yaml_content)?;

    // env, then the pipeline file, then the command line; checked once all
    // three are in
    let mut config = EngineConfig::from_env();
    parsed.config.apply_to(&mut config);
    overrides.apply_to(&mut config);
    config.validate()?;
    Ok((parsed, config))
}

fn run_pipeline(
    pipeline_path: &Path,
    overrides: &CliOverrides,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (parsed, config) = load(pipeline_path, overrides)?;
    let plan_hash = hash_serde(&parsed.steps)?;
    let mut tree = build_tree(&parsed, config)?;
    tracing::info!(pipeline = %pipeline_path.display(), plan = %plan_hash, "running pipeline");
    let manifest = tree.run_to_end()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }
    println!("✓ Pipeline executed successfully");
    println!("  Duration: {}ms", manifest.duration_ms());
    println!("  Buffers: {}", manifest.buffers);
    println!("  Rows: {}", manifest.rows);
    println!("  Epochs: {}", manifest.epochs);
    if let Some(digest) = manifest.outputs_digest {
        println!("  Output digest: {}", digest);
    }
    Ok(())
}

fn validate_pipeline(
    pipeline_path: &Path,
    overrides: &CliOverrides,
) -> Result<(), Box<dyn std::error::Error>> {
    let (parsed, config) = load(pipeline_path, overrides)?;
    let mut tree = build_tree(&parsed, config)?;
    tree.prepare()?;
    Ok(())
}

fn explain_pipeline(
    pipeline_path: &Path,
    overrides: &CliOverrides,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (parsed, config) = load(pipeline_path, overrides)?;
    let plan_hash = hash_serde(&parsed.steps)?;
    let mut tree = build_tree(&parsed, config.clone())?;
    tree.prepare()?;

    println!("Pipeline Execution Tree");
    println!("=======================");
    println!();
    println!("Plan hash: {}", plan_hash);
    println!("Config:");
    println!("  Connector queue size: {}", config.connector_queue_size);
    println!("  Default workers: {}", config.num_parallel_workers);
    println!("  Rows per buffer: {}", config.rows_per_buffer);
    println!();
    print!("{}", tree.print(verbose));
    Ok(())
}
