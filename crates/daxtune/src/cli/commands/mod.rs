use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;

use crate::models::{ToolResponse, ToolResponseFailure};

pub mod connect;
pub mod prepare;
pub mod schema;
pub mod tune;

/// Query text given inline or read from a file.
#[derive(Debug, Clone, Args)]
pub struct QueryInput {
    #[arg(value_name = "QUERY", conflicts_with = "query_file")]
    pub query: Option<String>,

    #[arg(long, value_name = "PATH")]
    pub query_file: Option<PathBuf>,
}

impl QueryInput {
    pub fn read(&self) -> Result<String> {
        match (&self.query, &self.query_file) {
            (Some(query), None) => Ok(query.clone()),
            (None, Some(path)) => read_query_file(path),
            (Some(_), Some(_)) => bail!("pass either QUERY or --query-file, not both"),
            (None, None) => bail!("a query is required; pass QUERY or --query-file"),
        }
    }
}

pub(crate) fn read_query_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read query file {}", path.display()))
}

/// Prints the payload as one JSON line; error payloads become a command failure.
pub(crate) fn emit(response: ToolResponse) -> Result<()> {
    println!("{}", response.to_json_line());
    if response.is_success() {
        Ok(())
    } else {
        Err(ToolResponseFailure::new(response).into())
    }
}
