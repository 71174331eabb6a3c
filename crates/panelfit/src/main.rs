// crates/panelfit/src/main.rs

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use panelfit_core::config::PipelineConfig;

mod commands;
mod registry;

use commands::estimate::EstimateArgs;

/// Panel construction and regression-matrix estimation.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the pipeline configuration file
    #[arg(short, long, default_value = "pipeline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build every declared panel variant from the raw sources
    Build,
    /// Run specifications against a built panel variant
    Estimate(EstimateArgs),
    /// Print the registered specification matrix
    ListSpecs,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
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
    match cli.command {
        Command::Build => {
            let config = load_config(&cli.config)?;
            commands::build::run(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Estimate(args) => {
            let config = load_config(&cli.config)?;
            commands::estimate::run(&config, &args)
        }
        Command::ListSpecs => {
            commands::list_specs::run()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: &PathBuf) -> Result<PipelineConfig> {
    PipelineConfig::from_toml_file(path)
        .with_context(|| format!("loading pipeline configuration {}", path.display()))
}
