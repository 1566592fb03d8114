//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::run::RunArgs;

#[derive(Parser, Debug)]
#[command(name = "campus-events")]
#[command(about = "Event-driven messaging runtime for the campus platform", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Load this YAML file instead of `.campus/config.yaml`
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the consumer group and health loop until SIGINT/SIGTERM
    Run(RunArgs),

    /// Run every health probe once and print the report
    Health,

    /// Print the effective configuration
    Config,
}
