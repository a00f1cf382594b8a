use std::collections::{BTreeSet, HashMap};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::inline::{DefinitionCatalog, FunctionDefinition, MeasureDefinition};
use crate::providers::{Gateway, QueryTarget};

pub const TABLES_QUERY: &str = "EVALUATE INFO.TABLES()";
pub const COLUMNS_QUERY: &str = "EVALUATE INFO.COLUMNS()";
pub const MEASURES_QUERY: &str = "EVALUATE INFO.MEASURES()";
pub const RELATIONSHIPS_QUERY: &str = "EVALUATE INFO.RELATIONSHIPS()";
pub const FUNCTIONS_QUERY: &str = "EVALUATE INFO.USERDEFINEDFUNCTIONS()";

/// `INFO.COLUMNS` marks the hidden per-table row-number column with this type.
const ROW_NUMBER_COLUMN_TYPE: &str = "3";

#[must_use]
pub fn dependency_query(query: &str) -> String {
    format!(
        "EVALUATE INFO.CALCDEPENDENCY(\"QUERY\", \"{}\")",
        query.replace('"', "\"\"")
    )
}

#[must_use]
pub fn strip_decoration(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.ends_with(']')
        && let Some(open) = trimmed.rfind('[')
    {
        return trimmed[open + 1..trimmed.len() - 1].replace("]]", "]");
    }
    trimmed
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .map_or_else(|| trimmed.to_string(), |inner| inner.replace("''", "'"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossFilter {
    Single,
    Both,
}

impl CrossFilter {
    #[must_use]
    pub fn from_code(code: Option<&str>) -> Self {
        if code.map(str::trim) == Some("2") {
            Self::Both
        } else {
            Self::Single
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

impl Cardinality {
    #[must_use]
    pub fn from_code(code: Option<&str>) -> Self {
        if code.map(str::trim) == Some("2") {
            Self::Many
        } else {
            Self::One
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub is_hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub table: String,
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeasureInfo {
    pub table: String,
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationshipInfo {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub is_active: bool,
    pub cross_filter: CrossFilter,
    pub from_cardinality: Cardinality,
    pub to_cardinality: Cardinality,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelMetadata {
    pub tables: Vec<TableInfo>,
    pub columns: Vec<ColumnInfo>,
    pub measures: Vec<MeasureInfo>,
    pub relationships: Vec<RelationshipInfo>,
}

impl ModelMetadata {
    #[must_use]
    pub fn scoped_to(&self, tables: &BTreeSet<String>) -> Self {
        Self {
            tables: self
                .tables
                .iter()
                .filter(|table| tables.contains(&table.name))
                .cloned()
                .collect(),
            columns: self
                .columns
                .iter()
                .filter(|column| tables.contains(&column.table))
                .cloned()
                .collect(),
            measures: self
                .measures
                .iter()
                .filter(|measure| tables.contains(&measure.table))
                .cloned()
                .collect(),
            relationships: self
                .relationships
                .iter()
                .filter(|rel| tables.contains(&rel.from_table) && tables.contains(&rel.to_table))
                .cloned()
                .collect(),
        }
    }

    #[must_use]
    pub fn canonical_table_name(&self, name: &str) -> Option<&str> {
        let wanted = strip_decoration(name);
        self.tables
            .iter()
            .find(|table| table.name.eq_ignore_ascii_case(&wanted))
            .map(|table| table.name.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CatalogRows {
    pub tables: Vec<Value>,
    pub columns: Vec<Value>,
    pub measures: Vec<Value>,
    pub relationships: Vec<Value>,
}

#[must_use]
pub fn build_model_metadata(rows: &CatalogRows) -> ModelMetadata {
    let mut table_names = HashMap::new();
    let tables = rows
        .tables
        .iter()
        .filter_map(|row| {
            let name = text(row, "Name")?;
            if let Some(id) = text(row, "ID") {
                table_names.insert(id, name.clone());
            }
            Some(TableInfo {
                name,
                is_hidden: flag(row, "IsHidden"),
            })
        })
        .collect::<Vec<_>>();
    let table_for = |row: &Value| -> Option<String> {
        let id = text(row, "TableID")?;
        Some(table_names.get(&id).cloned().unwrap_or(id))
    };

    let mut column_names = HashMap::new();
    let mut columns = Vec::new();
    for row in &rows.columns {
        if text(row, "Type").as_deref() == Some(ROW_NUMBER_COLUMN_TYPE) {
            continue;
        }
        let Some(table) = table_for(row) else {
            continue;
        };
        let Some(name) = text(row, "ExplicitName")
            .or_else(|| text(row, "InferredName"))
            .or_else(|| text(row, "Name"))
            .map(|name| strip_decoration(&name))
        else {
            continue;
        };
        if let Some(id) = text(row, "ID") {
            column_names.insert(id, name.clone());
        }
        columns.push(ColumnInfo {
            table,
            name,
            data_type: text(row, "ExplicitDataType").or_else(|| text(row, "DataType")),
        });
    }

    let measures = rows
        .measures
        .iter()
        .filter_map(|row| {
            Some(MeasureInfo {
                table: table_for(row)?,
                name: strip_decoration(&text(row, "Name")?),
                expression: text(row, "Expression").unwrap_or_default(),
            })
        })
        .collect();

    let lookup = |names: &HashMap<String, String>, row: &Value, column: &str| -> Option<String> {
        let id = text(row, column)?;
        Some(names.get(&id).cloned().unwrap_or(id))
    };
    let relationships = rows
        .relationships
        .iter()
        .filter_map(|row| {
            Some(RelationshipInfo {
                from_table: lookup(&table_names, row, "FromTableID")?,
                from_column: lookup(&column_names, row, "FromColumnID").unwrap_or_default(),
                to_table: lookup(&table_names, row, "ToTableID")?,
                to_column: lookup(&column_names, row, "ToColumnID").unwrap_or_default(),
                is_active: cell(row, "IsActive").is_none_or(truthy),
                cross_filter: CrossFilter::from_code(
                    text(row, "CrossFilteringBehavior").as_deref(),
                ),
                from_cardinality: Cardinality::from_code(text(row, "FromCardinality").as_deref()),
                to_cardinality: Cardinality::from_code(text(row, "ToCardinality").as_deref()),
            })
        })
        .collect();

    ModelMetadata {
        tables,
        columns,
        measures,
        relationships,
    }
}

/// Fixed point over active relationships: single direction walks from -> to,
/// bidirectional walks both ways.
#[must_use]
pub fn expand_tables(seed: &BTreeSet<String>, relationships: &[RelationshipInfo]) -> BTreeSet<String> {
    let mut expanded = seed.clone();
    loop {
        let mut added = false;
        for rel in relationships.iter().filter(|rel| rel.is_active) {
            if expanded.contains(&rel.from_table) && !expanded.contains(&rel.to_table) {
                expanded.insert(rel.to_table.clone());
                added = true;
            }
            if rel.cross_filter == CrossFilter::Both
                && expanded.contains(&rel.to_table)
                && !expanded.contains(&rel.from_table)
            {
                expanded.insert(rel.from_table.clone());
                added = true;
            }
        }
        if !added {
            return expanded;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopedMetadata {
    pub scoped: bool,
    pub direct_tables: Vec<String>,
    pub expanded_tables: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,

    pub metadata: ModelMetadata,
}

impl ScopedMetadata {
    fn full(metadata: ModelMetadata, reason: impl Into<String>) -> Self {
        Self {
            scoped: false,
            direct_tables: Vec::new(),
            expanded_tables: metadata.tables.iter().map(|table| table.name.clone()).collect(),
            fallback_reason: Some(reason.into()),
            metadata,
        }
    }
}

#[derive(Clone)]
pub struct MetadataService {
    gateway: Gateway,
}

impl MetadataService {
    #[must_use]
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    async fn rows(&self, target: &QueryTarget, query: &str) -> Result<Vec<Value>> {
        self.gateway
            .run_rows(target, query)
            .await
            .with_context(|| format!("introspection query `{query}` failed"))
    }

    pub async fn load_model_metadata(&self, target: &QueryTarget) -> Result<ModelMetadata> {
        let rows = CatalogRows {
            tables: self.rows(target, TABLES_QUERY).await?,
            columns: self.rows(target, COLUMNS_QUERY).await?,
            measures: self.rows(target, MEASURES_QUERY).await?,
            relationships: self.rows(target, RELATIONSHIPS_QUERY).await?,
        };
        let metadata = build_model_metadata(&rows);
        debug!(
            tables = metadata.tables.len(),
            columns = metadata.columns.len(),
            measures = metadata.measures.len(),
            relationships = metadata.relationships.len(),
            "model metadata loaded"
        );
        Ok(metadata)
    }

    pub async fn load_definitions(&self, target: &QueryTarget) -> Result<DefinitionCatalog> {
        let rows = CatalogRows {
            tables: self.rows(target, TABLES_QUERY).await?,
            measures: self.rows(target, MEASURES_QUERY).await?,
            ..CatalogRows::default()
        };
        let measures = build_model_metadata(&rows)
            .measures
            .into_iter()
            .map(|measure| MeasureDefinition {
                name: measure.name,
                table: measure.table,
                expression: measure.expression,
            });

        let functions = match self.rows(target, FUNCTIONS_QUERY).await {
            Ok(rows) => rows
                .iter()
                .filter_map(|row| {
                    Some(FunctionDefinition {
                        name: text(row, "Name")?,
                        expression: text(row, "Expression").unwrap_or_default(),
                    })
                })
                .collect(),
            Err(error) => {
                warn!(error = %format!("{error:#}"), "function catalog unavailable");
                Vec::new()
            }
        };

        Ok(DefinitionCatalog::new(measures, functions))
    }

    pub async fn query_dependencies(
        &self,
        target: &QueryTarget,
        query: &str,
    ) -> Result<BTreeSet<String>> {
        let rows = self.rows(target, &dependency_query(query)).await?;
        Ok(rows
            .iter()
            .filter_map(|row| text(row, "REFERENCED_TABLE"))
            .map(|table| strip_decoration(&table))
            .filter(|table| !table.is_empty())
            .collect())
    }

    pub async fn scoped_metadata(&self, target: &QueryTarget, query: &str) -> Result<ScopedMetadata> {
        let metadata = self.load_model_metadata(target).await?;

        let dependencies = match self.query_dependencies(target, query).await {
            Ok(dependencies) => dependencies,
            Err(error) => {
                warn!(error = %format!("{error:#}"), "dependency lookup failed; returning full model");
                return Ok(ScopedMetadata::full(
                    metadata,
                    format!("dependency lookup failed: {error:#}"),
                ));
            }
        };
        if dependencies.is_empty() {
            return Ok(ScopedMetadata::full(metadata, "query reports no table dependencies"));
        }

        let direct = dependencies
            .iter()
            .map(|table| {
                metadata
                    .canonical_table_name(table)
                    .map_or_else(|| table.clone(), str::to_string)
            })
            .collect::<BTreeSet<_>>();
        let expanded = expand_tables(&direct, &metadata.relationships);
        debug!(direct = direct.len(), expanded = expanded.len(), "query scope resolved");

        Ok(ScopedMetadata {
            scoped: true,
            metadata: metadata.scoped_to(&expanded),
            direct_tables: direct.into_iter().collect(),
            expanded_tables: expanded.into_iter().collect(),
            fallback_reason: None,
        })
    }
}

fn cell<'a>(row: &'a Value, column: &str) -> Option<&'a Value> {
    row.as_object()?
        .iter()
        .find(|(key, _)| strip_decoration(key).eq_ignore_ascii_case(column))
        .map(|(_, value)| value)
}

fn text(row: &Value, column: &str) -> Option<String> {
    match cell(row, column)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn flag(row: &Value, column: &str) -> bool {
    cell(row, column).is_some_and(truthy)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => matches!(text.trim().to_ascii_lowercase().as_str(), "true" | "1"),
        _ => false,
    }
}
