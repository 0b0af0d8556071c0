//! CLI module for the fleet planner.
//!
//! This module provides the command-line interface for validating
//! manifests and planning deployments against a state snapshot.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
