use anyhow::{Result, bail};
use clap::Args;
use serde_json::Value;

use super::emit;
use crate::connection::ConnectRequest;
use crate::engine::TuningEngine;

#[derive(Debug, Clone, Default, Args)]
pub struct ConnectArgs {
    /// Dataset name or id.
    #[arg(long)]
    pub dataset: Option<String>,

    /// Remote workspace (group) name.
    #[arg(long)]
    pub group: Option<String>,

    #[arg(long)]
    pub endpoint: Option<String>,

    /// Port of a local instance.
    #[arg(long)]
    pub port: Option<u16>,

    /// `local` or `remote`; inferred from the other flags when omitted.
    #[arg(long)]
    pub topology: Option<String>,
}

impl ConnectArgs {
    #[must_use]
    pub fn to_request(&self) -> ConnectRequest {
        ConnectRequest {
            dataset: self.dataset.clone(),
            group: self.group.clone(),
            endpoint: self.endpoint.clone(),
            port: self.port,
            topology: self.topology.clone(),
        }
    }
}

pub async fn run(args: &ConnectArgs, engine: &TuningEngine) -> Result<()> {
    emit(engine.connect(&args.to_request()).await)
}

/// Connects and requires an actual session rather than a discovery listing.
pub(crate) async fn require_session(args: &ConnectArgs, engine: &TuningEngine) -> Result<()> {
    let response = engine.connect(&args.to_request()).await;
    if response.is_success()
        && response.field("action").and_then(Value::as_str) != Some("connected")
    {
        println!("{}", response.to_json_line());
        bail!("connection arguments did not identify a single dataset; see the discovery listing");
    }
    emit(response)
}
