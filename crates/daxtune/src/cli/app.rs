use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::commands::{
    connect::ConnectArgs, prepare::PrepareArgs, schema::SchemaArgs, tune::TuneArgs,
};

#[derive(Debug, Parser)]
#[command(name = "daxtune", version, about = "Measure, inline and compare analytical model queries")]
pub struct Cli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    /// JSON model description served in place of a live server.
    #[arg(long, global = true, value_name = "PATH", env = "DAXTUNE_FIXTURE")]
    pub fixture: Option<PathBuf>,

    #[arg(long, global = true, value_name = "N", env = "DAXTUNE_RUNS")]
    pub runs: Option<usize>,

    #[arg(long, global = true, value_name = "PERCENT", env = "DAXTUNE_THRESHOLD")]
    pub threshold: Option<f64>,

    #[arg(long, global = true, value_name = "SECS", env = "DAXTUNE_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    #[arg(long, global = true, value_name = "URL", env = "DAXTUNE_REMOTE_ENDPOINT_BASE")]
    pub remote_endpoint_base: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Connect(ConnectArgs),
    Prepare(PrepareArgs),
    Tune(TuneArgs),
    Schema(SchemaArgs),
}
