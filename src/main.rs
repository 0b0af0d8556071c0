//! fleetplan CLI entrypoint.
//!
//! This is the main entrypoint for the fleetplan command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use fleet_planner::cli::{Cli, Commands, OutputFormat, OutputFormatter};
use fleet_planner::config::{
    find_manifest_file, ConfigParser, ConfigValidator, DeploymentManifest,
};
use fleet_planner::error::Result;
use fleet_planner::reconciler::Reconciler;
use fleet_planner::state::{DeploymentSnapshot, SnapshotStore, SNAPSHOT_FILE};

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Exit code reported by `drift` when the deployment has drifted.
const DRIFT_EXIT_CODE: u8 = 2;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.output == OutputFormat::Json);

    let formatter = OutputFormatter::new(cli.output);
    match run(&cli, &formatter) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// Logs go to stderr so command output on stdout stays machine readable.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Dispatches the selected command.
fn run(cli: &Cli, formatter: &OutputFormatter) -> Result<ExitCode> {
    match &cli.command {
        Commands::Validate { warnings } => {
            cmd_validate(cli.manifest.as_ref(), *warnings, formatter)
        }
        Commands::Plan {
            detailed,
            skip_drain,
        } => cmd_plan(cli, *detailed, *skip_drain, formatter),
        Commands::Drift => cmd_drift(cli, formatter),
    }
}

/// Validate the manifest.
fn cmd_validate(
    manifest_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (manifest, manifest_file) = load_manifest(manifest_path)?;
    info!("Validating manifest: {}", manifest_file.display());

    let result = ConfigValidator::new().check(&manifest);
    emit(&formatter.format_validation(&result, show_warnings))?;

    if result.is_valid() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Show the deployment plan.
fn cmd_plan(
    cli: &Cli,
    detailed: bool,
    skip_drain: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (manifest, manifest_file) = load_manifest(cli.manifest.as_ref())?;
    ConfigValidator::new().validate(&manifest)?;
    let snapshot = load_snapshot(cli.state.as_ref(), &manifest_file, &manifest)?;

    let plan = Reconciler::new(&manifest)
        .with_skip_drain(skip_drain)
        .reconcile(&snapshot)?;

    emit(&formatter.format_plan(&plan.report()?, detailed))?;
    Ok(ExitCode::SUCCESS)
}

/// Check for drift.
fn cmd_drift(cli: &Cli, formatter: &OutputFormatter) -> Result<ExitCode> {
    let (manifest, manifest_file) = load_manifest(cli.manifest.as_ref())?;
    ConfigValidator::new().validate(&manifest)?;
    let snapshot = load_snapshot(cli.state.as_ref(), &manifest_file, &manifest)?;

    let report = Reconciler::new(&manifest).check_drift(&snapshot)?;
    emit(&formatter.format_drift(&report))?;

    if report.is_converged() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(DRIFT_EXIT_CODE))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Writes command output to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{output}")?;
    Ok(())
}

/// Resolves the manifest file path.
fn resolve_manifest_path(manifest_path: Option<&PathBuf>) -> Result<PathBuf> {
    manifest_path.map_or_else(|| find_manifest_file("."), |path| Ok(path.clone()))
}

/// Directory holding the manifest.
fn manifest_dir(manifest_file: &Path) -> &Path {
    manifest_file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Loads the manifest with `.env` and environment overrides applied.
fn load_manifest(manifest_path: Option<&PathBuf>) -> Result<(DeploymentManifest, PathBuf)> {
    let manifest_file = resolve_manifest_path(manifest_path)?;
    debug!("Loading manifest from: {}", manifest_file.display());

    let parser = ConfigParser::new().with_base_path(manifest_dir(&manifest_file));
    parser.load_dotenv()?;

    let manifest = parser.load_with_env(&manifest_file)?;
    Ok((manifest, manifest_file))
}

/// Loads the state snapshot, next to the manifest unless given explicitly.
fn load_snapshot(
    state_path: Option<&PathBuf>,
    manifest_file: &Path,
    manifest: &DeploymentManifest,
) -> Result<DeploymentSnapshot> {
    let path = state_path.map_or_else(
        || manifest_dir(manifest_file).join(SNAPSHOT_FILE),
        PathBuf::clone,
    );
    debug!("Loading state snapshot from: {}", path.display());

    SnapshotStore::new(path).load_or_empty(&manifest.name)
}
