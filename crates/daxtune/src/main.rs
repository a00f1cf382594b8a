#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::Parser;
use clap::error::ErrorKind;
use daxtune::cli::app::{Cli, Command, RuntimeArgs};
use daxtune::cli::commands;
use daxtune::config::resolve_engine_config;
use daxtune::models::ToolResponseFailure;
use daxtune::providers::Collaborators;
use daxtune::providers::fixture::FixtureBackend;
use daxtune::TuningEngine;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_TOOL_FAILURE: i32 = 2;
const EXIT_USAGE_ERROR: i32 = 64;

const DEFAULT_LOG_FILTER: &str = "daxtune=info";

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return exit_code_for_parse_error(error),
    };
    install_tracing_subscriber();
    let command_name = command_name(&cli.command);
    info!(command = command_name, "starting");

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to start async runtime");
            return EXIT_RUNTIME_FAILURE;
        }
    };

    match runtime.block_on(execute(cli)) {
        Ok(()) => {
            info!(command = command_name, exit_code = EXIT_SUCCESS, "completed");
            EXIT_SUCCESS
        }
        Err(err) => {
            let exit_code = classify_runtime_error(&err);
            match err.downcast_ref::<ToolResponseFailure>() {
                Some(failure) => {
                    let response = failure.response();
                    error!(
                        command = command_name,
                        exit_code,
                        operation = %response.operation,
                        error_code = response.error_code.as_deref().unwrap_or("unknown"),
                        "failed"
                    );
                }
                None => {
                    error!(command = command_name, exit_code, "failed");
                    eprintln!("{err:#}");
                }
            }
            exit_code
        }
    }
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn execute(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Schema(args) => commands::schema::run(args),
        Command::Connect(args) => commands::connect::run(args, &build_engine(&cli.runtime)?).await,
        Command::Prepare(args) => commands::prepare::run(args, &build_engine(&cli.runtime)?).await,
        Command::Tune(args) => commands::tune::run(args, &build_engine(&cli.runtime)?).await,
    }
}

fn build_engine(args: &RuntimeArgs) -> Result<TuningEngine> {
    let config = resolve_engine_config(
        args.runs,
        args.threshold,
        args.timeout_secs,
        args.remote_endpoint_base.as_deref(),
    )?;
    let fixture = args
        .fixture
        .as_deref()
        .ok_or_else(|| anyhow!("no backend configured; pass --fixture or set DAXTUNE_FIXTURE"))?;
    let backend = Arc::new(FixtureBackend::from_path(fixture)?);
    Ok(TuningEngine::new(Collaborators::from_backend(backend), config))
}

fn classify_runtime_error(error: &anyhow::Error) -> i32 {
    if error.downcast_ref::<ToolResponseFailure>().is_some() {
        EXIT_TOOL_FAILURE
    } else {
        EXIT_RUNTIME_FAILURE
    }
}

fn exit_code_for_parse_error(error: clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = error.print();
            EXIT_SUCCESS
        }
        _ => {
            let _ = error.print();
            EXIT_USAGE_ERROR
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Connect(_) => "connect",
        Command::Prepare(_) => "prepare",
        Command::Tune(_) => "tune",
        Command::Schema(_) => "schema",
    }
}
