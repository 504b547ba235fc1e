//! Binary entry point for the `osprobe` CLI.

mod cli;

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use osprobe::{
    Collaborators, ContractError, DeviceTypeContract, FileResultStore, HttpFleetClient,
    ImageFetcher, Operator, ProcessCommandRunner, ProvisioningOrchestrator, RunConfig, RunError,
    SelectionError, TerminalOperator, WorkerConfig, WorkerError, WorkerKind, WorkerRegistry,
    catalog, select,
};

use crate::cli::{Cli, RunOverrides};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

fn config_error(err: impl std::fmt::Display) -> CliError {
    CliError::Config(err.to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Run(overrides) => run_command(&overrides).await,
        Cli::Plan(overrides) => plan_command(&overrides),
    }
}

fn load_config(overrides: &RunOverrides) -> Result<RunConfig, CliError> {
    let mut config = RunConfig::load_without_cli_args().map_err(config_error)?;
    apply_overrides(&mut config, overrides);
    Ok(config)
}

fn apply_overrides(config: &mut RunConfig, overrides: &RunOverrides) {
    if let Some(device_type) = &overrides.device_type {
        config.device_type.clone_from(device_type);
    }
    if let Some(os_version) = &overrides.os_version {
        config.os_version.clone_from(os_version);
    }
    if overrides.interactive {
        config.interactive_tests = true;
    }
}

fn load_contract(config: &RunConfig) -> Result<DeviceTypeContract, CliError> {
    let root = Utf8Path::new(config.contracts_dir.trim());
    Ok(DeviceTypeContract::load(root, &config.device_type)?)
}

fn plan_command(overrides: &RunOverrides) -> Result<i32, CliError> {
    let config = load_config(overrides)?;
    config.validate_for_plan().map_err(config_error)?;
    let contract = load_contract(&config)?;
    let kind = WorkerKind::for_device_type(contract.slug())?;
    let selected = select(catalog(), &config, &contract)?;

    let mut stdout = io::stdout().lock();
    writeln!(
        stdout,
        "{} ({}) on the {kind} worker: {} tests",
        contract.name(),
        contract.slug(),
        selected.len()
    )?;
    for test in &selected {
        writeln!(stdout, "  {}", test.title)?;
    }
    Ok(0)
}

async fn run_command(overrides: &RunOverrides) -> Result<i32, CliError> {
    let config = load_config(overrides)?;
    config.validate().map_err(config_error)?;
    let worker_config = WorkerConfig::load_without_cli_args().map_err(config_error)?;
    worker_config.validate().map_err(config_error)?;
    let contract = load_contract(&config)?;

    let runner = ProcessCommandRunner;
    let tmpdir = config.tmpdir_path();
    let operator: Arc<dyn Operator> = Arc::new(TerminalOperator::new());
    let collaborators = Collaborators {
        fleet: HttpFleetClient::new(
            &config.fleet_url,
            config.image_url.as_deref(),
            &config.ssh_host,
            runner,
        ),
        workers: WorkerRegistry::new(
            worker_config,
            config.disk.as_deref().map(Utf8PathBuf::from),
            tmpdir.join("worker"),
            runner,
            Arc::clone(&operator),
        ),
        images: ImageFetcher::new(tmpdir, config.image_configure_bin.clone(), runner),
        sink: FileResultStore::new(Utf8PathBuf::from(config.results_path.trim())),
        operator,
    };
    let results_path = config.results_path.clone();
    let orchestrator = ProvisioningOrchestrator::new(config, collaborators);
    let results = orchestrator.execute(contract, catalog()).await?;

    let failed = results.tests().iter().filter(|test| !test.passed).count();
    info!(failed, "run complete");
    writeln!(
        io::stdout(),
        "{} of {} tests passed; results written to {results_path}",
        results.tests().len() - failed,
        results.tests().len()
    )?;
    Ok(0)
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
