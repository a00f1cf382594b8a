use anyhow::Result;
use clap::Args;

use super::connect::{ConnectArgs, require_session};
use super::{QueryInput, emit};
use crate::engine::TuningEngine;

#[derive(Debug, Clone, Args)]
pub struct PrepareArgs {
    #[command(flatten)]
    pub connection: ConnectArgs,

    #[command(flatten)]
    pub input: QueryInput,
}

pub async fn run(args: &PrepareArgs, engine: &TuningEngine) -> Result<()> {
    let query = args.input.read()?;
    require_session(&args.connection, engine).await?;
    emit(engine.prepare_query(&query).await)
}
