//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// fleetplan - Instance reconciliation planner for declarative deployments.
#[derive(Parser, Debug)]
#[command(name = "fleetplan")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the deployment manifest.
    #[arg(short, long, global = true, env = "FLEETPLAN_MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Path to the deployment state snapshot.
    #[arg(short, long, global = true, env = "FLEETPLAN_STATE")]
    pub state: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the deployment manifest.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Plan every instance against the state snapshot.
    Plan {
        /// Show per-instance changes and addresses.
        #[arg(short, long)]
        detailed: bool,

        /// Plan without draining instances.
        #[arg(long)]
        skip_drain: bool,
    },

    /// Check for drift between the manifest and the state snapshot.
    Drift,
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
