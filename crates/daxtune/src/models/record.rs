use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::bail;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analysis::{PerformanceAnalysis, SemanticAnalysis};
use crate::models::trace::PerformanceSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    Baseline,
    Optimization,
}

impl QueryMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Optimization => "optimization",
        }
    }
}

impl Display for QueryMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMode {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "baseline" => Ok(Self::Baseline),
            "optimization" | "optimisation" => Ok(Self::Optimization),
            other => bail!("unsupported execution mode `{other}` (expected `baseline` or `optimization`)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueryRecord {
    pub id: String,
    pub query: String,
    pub mode: QueryMode,
    pub timestamp_utc: String,
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub results: QueryResults,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueryResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceSnapshot>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub rows: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_analysis: Option<PerformanceAnalysis>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_analysis: Option<SemanticAnalysis>,
}

#[must_use]
pub fn query_record_schema() -> Value {
    let schema = schemars::schema_for!(QueryRecord);
    serde_json::to_value(schema).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::{QueryMode, query_record_schema};
    use serde_json::Value;

    #[test]
    fn parses_modes_case_insensitively() {
        assert_eq!("Baseline".parse::<QueryMode>().expect("mode"), QueryMode::Baseline);
        assert_eq!(
            " optimization ".parse::<QueryMode>().expect("mode"),
            QueryMode::Optimization
        );
        let err = "rewrite".parse::<QueryMode>().expect_err("must fail");
        assert!(err.to_string().contains("unsupported execution mode"));
    }

    #[test]
    fn schema_marks_core_fields_as_required() {
        let schema = query_record_schema();
        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .expect("schema must include required list");
        for field in ["id", "query", "mode", "timestamp_utc", "success", "results"] {
            assert!(required.iter().any(|value| value.as_str() == Some(field)));
        }
    }
}
