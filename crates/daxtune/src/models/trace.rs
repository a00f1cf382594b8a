use anyhow::{Result, anyhow};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::utils::time::normalize_server_timestamp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PerformanceSnapshot {
    pub total_ms: f64,
    pub fe_ms: f64,
    pub se_ms: f64,
    pub se_cpu_ms: f64,
    pub se_parallelism: f64,
    pub se_queries: u64,
    pub se_cache_hits: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_end: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub result_number: i64,
    pub columns: Vec<String>,
    pub rows: Vec<Value>,
}

impl ResultSet {
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        if !self.columns.is_empty() {
            return self.columns.len();
        }
        self.rows
            .first()
            .and_then(Value::as_object)
            .map_or(0, Map::len)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceOutput {
    /// `None` when the performance block lacks a numeric `Total`.
    pub performance: Option<PerformanceSnapshot>,
    pub server_error: Option<String>,
    pub results: Value,
}

impl TraceOutput {
    pub fn parse(raw: &Value) -> Result<Self> {
        let object = raw
            .as_object()
            .ok_or_else(|| anyhow!("trace output must be a JSON object"))?;
        let performance_block = object
            .get("Performance")
            .and_then(Value::as_object)
            .ok_or_else(|| anyhow!("trace output is missing the `Performance` object"))?;

        Ok(Self {
            performance: parse_performance(performance_block),
            server_error: parse_server_error(performance_block),
            results: object.get("Results").cloned().unwrap_or(Value::Null),
        })
    }

    #[must_use]
    pub fn total_ms(&self) -> Option<f64> {
        self.performance.as_ref().map(|snapshot| snapshot.total_ms)
    }

    pub fn result_sets(&self) -> std::result::Result<Vec<ResultSet>, String> {
        parse_result_sets(&self.results)
    }

    pub fn first_rows(&self) -> Result<Vec<Value>> {
        let mut sets = self.result_sets().map_err(|message| anyhow!(message))?;
        sets.sort_by_key(|set| set.result_number);
        Ok(sets.into_iter().next().map(|set| set.rows).unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimedRun {
    pub run_number: usize,
    pub output: TraceOutput,
}

pub fn parse_result_sets(raw: &Value) -> std::result::Result<Vec<ResultSet>, String> {
    let entries = raw
        .as_array()
        .ok_or_else(|| "results are not a sequence of result sets".to_string())?;

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let object = entry
                .as_object()
                .ok_or_else(|| format!("result entry {index} is not an object"))?;
            let result_number = object
                .get("ResultNumber")
                .and_then(Value::as_i64)
                .ok_or_else(|| format!("result entry {index} has no integer `ResultNumber`"))?;
            let rows = object
                .get("Rows")
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| format!("result set {result_number} has no `Rows` array"))?;
            let columns = object
                .get("Columns")
                .and_then(Value::as_array)
                .map(|columns| columns.iter().filter_map(column_name).collect())
                .unwrap_or_default();

            Ok(ResultSet {
                result_number,
                columns,
                rows,
            })
        })
        .collect()
}

fn column_name(column: &Value) -> Option<String> {
    match column {
        Value::String(name) => Some(name.clone()),
        Value::Object(object) => object
            .get("Name")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn parse_performance(block: &Map<String, Value>) -> Option<PerformanceSnapshot> {
    let total_ms = number_field(block, "Total")?;
    Some(PerformanceSnapshot {
        total_ms,
        fe_ms: number_field(block, "FE").unwrap_or(0.0),
        se_ms: number_field(block, "SE").unwrap_or(0.0),
        se_cpu_ms: number_field(block, "SE_CPU").unwrap_or(0.0),
        se_parallelism: number_field(block, "SE_Par").unwrap_or(0.0),
        se_queries: count_field(block, "SE_Queries"),
        se_cache_hits: count_field(block, "SE_Cache"),
        query_end: block
            .get("QueryEnd")
            .and_then(Value::as_str)
            .filter(|text| !text.trim().is_empty())
            .map(normalize_server_timestamp),
    })
}

fn parse_server_error(block: &Map<String, Value>) -> Option<String> {
    let message = block
        .get("ErrorMessage")
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string);

    match block.get("Error") {
        Some(Value::Bool(true)) => {
            Some(message.unwrap_or_else(|| "server reported an error".to_string()))
        }
        Some(Value::String(text)) if !text.trim().is_empty() => {
            Some(message.unwrap_or_else(|| text.clone()))
        }
        _ => None,
    }
}

fn number_field(block: &Map<String, Value>, key: &str) -> Option<f64> {
    match block.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn count_field(block: &Map<String, Value>, key: &str) -> u64 {
    number_field(block, key)
        .filter(|value| value.is_finite() && *value >= 0.0)
        .map_or(0, |value| value.round() as u64)
}
