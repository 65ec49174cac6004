//! nperf-bench - benchmark orchestration for the nperf network workload
//!
//! ## Commands
//!
//! - `run`: execute a suite and write one CSV row per run
//! - `expand`: print the expanded suite without launching anything

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use nperf_bench_core::Aggregator;
use nperf_bench_runner::{BenchPipeline, ProcessLauncher, TrialCoordinator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

mod config;
mod csv_sink;

use config::{load_suite, BenchOptions, WrapperConfig, DEFAULT_NPERF_BIN, DEFAULT_RESULTS_DIR};
use csv_sink::CsvSink;

#[derive(Parser)]
#[command(name = "nperf-bench")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Benchmark orchestration for nperf", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a benchmark suite
    Run {
        /// Path to the JSON suite configuration
        #[arg(required_unless_present = "yaml")]
        config: Option<PathBuf>,

        /// Name of the CSV file to write (default: <config>-<MM-DD-HH:MM>.csv)
        #[arg(conflicts_with = "yaml")]
        results_file: Option<String>,

        /// YAML wrapper naming the config, binary and remote hosts
        #[arg(long, conflicts_with = "config")]
        yaml: Option<PathBuf>,

        /// Path to the nperf binary
        #[arg(long, env = "NPERF_BIN", default_value = DEFAULT_NPERF_BIN)]
        nperf_bin: PathBuf,

        /// Directory for results, records and failure logs
        #[arg(long, default_value = DEFAULT_RESULTS_DIR)]
        results_dir: PathBuf,
    },

    /// Print the expanded suite as JSON
    Expand {
        /// Path to the JSON suite configuration
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    nperf_bench_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            config,
            results_file,
            yaml,
            nperf_bin,
            results_dir,
        } => {
            let options = match (yaml, config) {
                (Some(wrapper), _) => BenchOptions::from_wrapper(
                    WrapperConfig::load(&wrapper)?,
                    nperf_bin,
                    results_dir,
                    Local::now(),
                )?,
                (None, Some(config)) => BenchOptions::from_args(
                    config,
                    results_file.as_deref(),
                    nperf_bin,
                    results_dir,
                    Local::now(),
                ),
                (None, None) => anyhow::bail!("a config file or --yaml wrapper must be supplied"),
            };
            cmd_run(options).await
        }
        Commands::Expand { config } => cmd_expand(&config),
    }
}

async fn cmd_run(options: BenchOptions) -> Result<()> {
    info!(nperf_bin = %options.nperf_bin.display(), "using nperf binary");
    info!(config = %options.config_file.display(), "reading config file");

    let suite = load_suite(&options.config_file)?;
    info!(
        tests = suite.tests.len(),
        runs = suite.run_count(),
        digest = %suite.short_digest(),
        "suite expanded"
    );

    let coordinator = TrialCoordinator::new(
        Arc::new(ProcessLauncher::new()),
        options.coordinator_settings(),
    );
    let pipeline = BenchPipeline::new(coordinator, Aggregator::default());
    let mut sink = CsvSink::new(options.results_path());

    let report = pipeline
        .run(&suite, &mut sink)
        .await
        .context("benchmark suite aborted")?;

    println!(
        "Suite {}: {} run(s) retained, {} dropped, {} attempt(s)",
        suite.short_digest(),
        report.retained_count(),
        report.dropped_count(),
        report.total_attempts()
    );
    println!("Results stored in: {}", sink.path().display());
    Ok(())
}

fn cmd_expand(config: &Path) -> Result<()> {
    let suite = load_suite(config)?;
    println!("{}", serde_json::to_string_pretty(&suite)?);
    Ok(())
}
