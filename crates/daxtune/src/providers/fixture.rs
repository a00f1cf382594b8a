use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    DatasetRef, Discovery, GuidanceArticle, GuidanceProvider, LocalInstance, RemoteGroup,
    TokenProvider, TraceRunner,
};
use crate::config::is_remote_url;
use crate::connection::SMOKE_TEST_QUERY;
use crate::metadata::{
    COLUMNS_QUERY, FUNCTIONS_QUERY, MEASURES_QUERY, RELATIONSHIPS_QUERY, TABLES_QUERY,
};

const DEPENDENCY_QUERY_PREFIX: &str = "EVALUATE INFO.CALCDEPENDENCY(";
const DEFAULT_TOTAL_MS: f64 = 100.0;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixtureModel {
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub local_instances: Vec<LocalInstance>,

    #[serde(default)]
    pub remote_groups: Vec<FixtureGroup>,

    #[serde(default)]
    pub catalog: FixtureCatalog,

    #[serde(default)]
    pub dependencies: Vec<DependencyRule>,

    #[serde(default)]
    pub responses: Vec<ResponseRule>,

    #[serde(default)]
    pub guidance: Option<Vec<GuidanceArticle>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixtureGroup {
    pub name: String,
    pub id: String,

    #[serde(default)]
    pub datasets: Vec<DatasetRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixtureCatalog {
    #[serde(default)]
    pub tables: Vec<Value>,
    #[serde(default)]
    pub columns: Vec<Value>,
    #[serde(default)]
    pub measures: Vec<Value>,
    #[serde(default)]
    pub relationships: Vec<Value>,
    #[serde(default)]
    pub functions: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DependencyRule {
    pub contains: String,
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseRule {
    /// First rule whose text occurs in the query answers it.
    pub contains: String,

    #[serde(default)]
    pub totals: Vec<f64>,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub error_on_calls: Vec<usize>,

    #[serde(default)]
    pub results: Option<Value>,
}

#[derive(Debug)]
pub struct FixtureBackend {
    model: FixtureModel,
    rule_calls: Mutex<Vec<usize>>,
    executed: Mutex<Vec<String>>,
    collaborator_calls: Mutex<usize>,
}

impl FixtureBackend {
    #[must_use]
    pub fn from_model(model: FixtureModel) -> Self {
        let rule_calls = vec![0; model.responses.len()];
        Self {
            model,
            rule_calls: Mutex::new(rule_calls),
            executed: Mutex::new(Vec::new()),
            collaborator_calls: Mutex::new(0),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture model {}", path.display()))?;
        let model = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse fixture model {}", path.display()))?;
        Ok(Self::from_model(model))
    }

    #[must_use]
    pub fn executed_queries(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    #[must_use]
    pub fn collaborator_calls(&self) -> usize {
        *self.collaborator_calls.lock()
    }

    fn touch(&self) {
        *self.collaborator_calls.lock() += 1;
    }

    fn datasets_at(&self, endpoint: &str) -> Option<&[DatasetRef]> {
        if is_remote_url(endpoint) {
            let group = endpoint.trim_end_matches('/').rsplit('/').next()?;
            return self
                .model
                .remote_groups
                .iter()
                .find(|candidate| candidate.name.eq_ignore_ascii_case(group))
                .map(|found| found.datasets.as_slice());
        }
        self.model
            .local_instances
            .iter()
            .find(|instance| instance.endpoint().eq_ignore_ascii_case(endpoint))
            .map(|instance| instance.datasets.as_slice())
    }

    fn check_token(&self, endpoint: &str, token: Option<&str>) -> Result<()> {
        if is_remote_url(endpoint) && token.is_none_or(|token| Some(token) != self.model.access_token.as_deref()) {
            bail!("unauthorized: missing or invalid access token for {endpoint}");
        }
        Ok(())
    }

    fn respond(&self, query: &str) -> Value {
        let trimmed = query.trim();
        if trimmed == SMOKE_TEST_QUERY {
            return trace(1.0, json!([{"ResultNumber": 1, "Rows": [{"[Value]": 1}]}]));
        }
        if trimmed.starts_with(DEPENDENCY_QUERY_PREFIX) {
            let tables = self
                .model
                .dependencies
                .iter()
                .find(|rule| trimmed.contains(&rule.contains))
                .map(|rule| rule.tables.clone())
                .unwrap_or_default();
            let rows = tables
                .iter()
                .map(|table| json!({"[REFERENCED_OBJECT_TYPE]": "TABLE", "[REFERENCED_TABLE]": table}))
                .collect::<Vec<_>>();
            return rows_trace(rows);
        }

        let catalog = &self.model.catalog;
        let introspection = match trimmed {
            TABLES_QUERY => Some(catalog.tables.clone()),
            COLUMNS_QUERY => Some(catalog.columns.clone()),
            MEASURES_QUERY => Some(catalog.measures.clone()),
            RELATIONSHIPS_QUERY => Some(catalog.relationships.clone()),
            FUNCTIONS_QUERY => match &catalog.functions {
                Some(rows) => Some(rows.clone()),
                None => return error_trace("INFO.USERDEFINEDFUNCTIONS is not supported by this model"),
            },
            _ => None,
        };
        if let Some(rows) = introspection {
            return rows_trace(rows);
        }

        let Some(index) = self
            .model
            .responses
            .iter()
            .position(|rule| query.contains(&rule.contains))
        else {
            return default_trace(DEFAULT_TOTAL_MS);
        };
        let rule = &self.model.responses[index];
        let call = {
            let mut calls = self.rule_calls.lock();
            calls[index] += 1;
            calls[index]
        };

        if let Some(error) = &rule.error {
            return error_trace(error);
        }
        if rule.error_on_calls.contains(&call) {
            return error_trace(&format!("injected failure on call {call}"));
        }
        let total = if rule.totals.is_empty() {
            DEFAULT_TOTAL_MS
        } else {
            rule.totals[(call - 1) % rule.totals.len()]
        };
        match &rule.results {
            Some(results) => trace(total, results.clone()),
            None => default_trace(total),
        }
    }
}

fn trace(total_ms: f64, results: Value) -> Value {
    json!({
        "Performance": {
            "Total": total_ms,
            "FE": total_ms * 0.25,
            "SE": total_ms * 0.75,
            "SE_CPU": total_ms,
            "SE_Par": 1.0,
            "SE_Queries": 1,
            "SE_Cache": 0,
            "Error": false
        },
        "Results": results,
        "EventDetails": []
    })
}

fn default_trace(total_ms: f64) -> Value {
    trace(total_ms, json!([{"ResultNumber": 1, "Rows": []}]))
}

fn rows_trace(rows: Vec<Value>) -> Value {
    trace(1.0, json!([{"ResultNumber": 1, "Rows": rows}]))
}

fn error_trace(message: &str) -> Value {
    json!({
        "Performance": {"Error": true, "ErrorMessage": message},
        "Results": [],
        "EventDetails": []
    })
}

#[async_trait]
impl TraceRunner for FixtureBackend {
    async fn run_trace(
        &self,
        token: Option<&str>,
        endpoint: &str,
        dataset_id: &str,
        query: &str,
    ) -> Result<Value> {
        self.touch();
        self.check_token(endpoint, token)?;
        let datasets = self
            .datasets_at(endpoint)
            .ok_or_else(|| anyhow!("no server is listening at {endpoint}"))?;
        if !datasets.iter().any(|dataset| dataset.id == dataset_id) {
            bail!("dataset `{dataset_id}` does not exist at {endpoint}");
        }
        self.executed.lock().push(query.to_string());
        Ok(self.respond(query))
    }
}

#[async_trait]
impl Discovery for FixtureBackend {
    async fn discover_local_instances(&self) -> Result<Vec<LocalInstance>> {
        self.touch();
        Ok(self.model.local_instances.clone())
    }

    async fn list_databases(&self, endpoint: &str, token: Option<&str>) -> Result<Vec<DatasetRef>> {
        self.touch();
        self.check_token(endpoint, token)?;
        self.datasets_at(endpoint)
            .map(<[DatasetRef]>::to_vec)
            .ok_or_else(|| anyhow!("no server is listening at {endpoint}"))
    }

    async fn list_remote_groups(&self) -> Result<Vec<RemoteGroup>> {
        self.touch();
        Ok(self
            .model
            .remote_groups
            .iter()
            .map(|group| RemoteGroup {
                name: group.name.clone(),
                id: group.id.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl TokenProvider for FixtureBackend {
    async fn access_token(&self) -> Option<String> {
        self.touch();
        self.model.access_token.clone()
    }
}

#[async_trait]
impl GuidanceProvider for FixtureBackend {
    async fn fetch_guidance(&self, _query: &str) -> Result<Vec<GuidanceArticle>> {
        self.touch();
        self.model
            .guidance
            .clone()
            .ok_or_else(|| anyhow!("guidance service is unreachable"))
    }
}
