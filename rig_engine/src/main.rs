//! # Rig Binary
//!
//! Loads a pipeline file, builds the block graph and runs it until the
//! pipeline ends, a block fails or Ctrl-C is pressed.
//!
//! # Usage
//!
//! ```bash
//! # Run a pipeline
//! rig --config demos/motor_ramp.toml
//!
//! # Validate and build the graph without running it
//! rig --config demos/motor_ramp.toml --check
//!
//! # Verbose logging, JSON output
//! rig --config demos/motor_ramp.toml -v --json
//! ```

#![deny(warnings)]

use clap::Parser;
use rig_common::config::{ConfigError, ConfigLoader, LogLevel};
use rig_common::consts::DEFAULT_CONFIG_PATH;
use rig_engine::registry;
use rig_engine::{Orchestrator, PipelineConfig};
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Rig - block pipeline engine for test rigs
#[derive(Parser, Debug)]
#[command(name = "rig")]
#[command(version)]
#[command(about = "Run a block pipeline on a test rig")]
#[command(long_about = None)]
struct Args {
    /// Path to the pipeline file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    /// Validate the pipeline and build the graph, then exit
    #[arg(long)]
    check: bool,
}

fn main() {
    if let Err(e) = run() {
        error!("rig failed: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loaded = load_pipeline(&args.config);
    let level = loaded
        .as_ref()
        .map(|c| c.shared.log_level)
        .unwrap_or_default();
    setup_tracing(&args, level);

    info!("Rig v{} starting...", env!("CARGO_PKG_VERSION"));
    let config = loaded?;
    info!("Loaded pipeline '{}' from {:?}", config.shared.name, args.config);

    let orchestrator = Orchestrator::from_config(&config, registry::builtin())?;

    if args.check {
        info!(
            "Pipeline is valid: blocks {:?}",
            orchestrator.block_names()
        );
        return Ok(());
    }

    let cancel = orchestrator.cancel_token();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        cancel.cancel();
    })?;

    let summary = orchestrator.run()?;
    for report in &summary.reports {
        info!(
            "  {} ({}): {} loops, {} overruns",
            report.name, report.kind, report.loops, report.stats.overruns
        );
    }
    info!("Rig shutdown complete: {:?}", summary.reason);
    Ok(())
}

/// Load and validate the pipeline file.
fn load_pipeline(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let config = PipelineConfig::load(path)?;
    config.validate()?;
    Ok(config)
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, level: LogLevel) {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        level
            .as_directive()
            .parse::<LevelFilter>()
            .unwrap_or(LevelFilter::INFO)
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_names(true)
            .init();
    }
}
