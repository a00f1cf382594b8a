use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Args;
use tracing::info;

use super::connect::{ConnectArgs, require_session};
use super::{QueryInput, emit, read_query_file};
use crate::engine::TuningEngine;
use crate::models::QueryMode;

#[derive(Debug, Clone, Args)]
pub struct TuneArgs {
    #[command(flatten)]
    pub connection: ConnectArgs,

    #[command(flatten)]
    pub input: QueryInput,

    /// Rewritten query to measure against the baseline; repeatable.
    #[arg(long = "rewrite", value_name = "PATH", required = true)]
    pub rewrites: Vec<PathBuf>,
}

/// Prepares the baseline, measures every rewrite in order, then prints the session status.
pub async fn run(args: &TuneArgs, engine: &TuningEngine) -> Result<()> {
    let query = args.input.read()?;
    let rewrites = args
        .rewrites
        .iter()
        .map(|path| read_query_file(path))
        .collect::<Result<Vec<_>>>()?;

    require_session(&args.connection, engine).await?;
    emit(engine.prepare_query(&query).await)?;

    let mut failed = 0usize;
    for (index, rewrite) in rewrites.iter().enumerate() {
        let response = engine
            .execute_query(rewrite, QueryMode::Optimization.as_str())
            .await;
        if !response.is_success() {
            failed += 1;
        }
        info!(rewrite = index + 1, success = response.is_success(), "rewrite measured");
        println!("{}", response.to_json_line());
    }

    emit(engine.session_status())?;
    if failed > 0 {
        bail!("{failed} of {} rewrite(s) failed to execute", rewrites.len());
    }
    Ok(())
}
