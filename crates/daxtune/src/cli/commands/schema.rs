use anyhow::Result;
use clap::Args;
use serde_json::json;

use crate::models::{ToolResponse, query_record_schema};

#[derive(Debug, Clone, Args)]
pub struct SchemaArgs {
    #[arg(long, default_value_t = false)]
    pub pretty: bool,
}

pub fn run(args: &SchemaArgs) -> Result<()> {
    let response = ToolResponse::success("schema")
        .with_field("record", json!("query_record"))
        .with_field("schema", query_record_schema());
    if args.pretty {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("{}", response.to_json_line());
    }
    Ok(())
}
