#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use daxtune::TuningEngine;
use daxtune::config::EngineConfig;
use daxtune::providers::Collaborators;
use daxtune::providers::fixture::{FixtureBackend, FixtureModel};
use serde_json::{Value, json};

pub const BASELINE_QUERY: &str = "// baseline\nEVALUATE ROW(\"Margin\", [Margin])";
pub const FAST_REWRITE: &str = "// rewrite fast\nEVALUATE ROW(\"Margin\", 0.25)";
pub const SLOW_REWRITE: &str = "// rewrite slow\nEVALUATE ROW(\"Margin\", 0.25 + 0)";
pub const DIFFERENT_REWRITE: &str = "// rewrite different\nEVALUATE ROW(\"Margin\", 0.3)";
pub const BROKEN_WARMUP: &str = "// broken warmup\nEVALUATE ROW(\"x\", 1)";
pub const BROKEN_SECOND_RUN: &str = "// broken run2\nEVALUATE ROW(\"x\", 1)";

fn margin_results(value: f64) -> Value {
    json!([{"ResultNumber": 1, "Columns": ["[Margin]"], "Rows": [{"[Margin]": value}]}])
}

pub fn sales_model() -> Value {
    json!({
        "access_token": "secret-token",
        "local_instances": [
            {
                "port": 51000,
                "display_name": "Sales Model.pbix",
                "datasets": [{"name": "Sales Model", "id": "sales-model-id"}]
            },
            {
                "port": 52000,
                "display_name": "Archive.pbix",
                "datasets": [
                    {"name": "Sales Archive", "id": "sales-archive-id"},
                    {"name": "Sales", "id": "sales-id"}
                ]
            }
        ],
        "remote_groups": [
            {"name": "Finance", "id": "grp-fin", "datasets": [{"name": "Budget", "id": "budget-id"}]},
            {"name": "Operations", "id": "grp-ops", "datasets": []}
        ],
        "catalog": {
            "tables": [
                {"[ID]": 1, "[Name]": "Sales"},
                {"[ID]": 2, "[Name]": "Date"},
                {"[ID]": 3, "[Name]": "Region"}
            ],
            "columns": [
                {"[ID]": 10, "[TableID]": 1, "[ExplicitName]": "DateKey", "[Type]": 1},
                {"[ID]": 11, "[TableID]": 1, "[ExplicitName]": "Qty", "[Type]": 1},
                {"[ID]": 20, "[TableID]": 2, "[ExplicitName]": "DateKey", "[Type]": 1},
                {"[ID]": 30, "[TableID]": 3, "[ExplicitName]": "RegionKey", "[Type]": 1}
            ],
            "measures": [
                {"[TableID]": 1, "[Name]": "Total Sales", "[Expression]": "SUMX(Sales, Sales[Qty] * Sales[Price])"},
                {"[TableID]": 1, "[Name]": "Margin", "[Expression]": "SafeRatio([Total Sales] - [Total Cost], [Total Sales])"},
                {"[TableID]": 1, "[Name]": "Total Cost", "[Expression]": "SUM(Sales[Cost])"}
            ],
            "functions": [
                {"[Name]": "SafeRatio", "[Expression]": "(a, b) => DIVIDE(a, b)"}
            ],
            "relationships": [
                {
                    "[FromTableID]": 1, "[FromColumnID]": 10,
                    "[ToTableID]": 2, "[ToColumnID]": 20,
                    "[IsActive]": true, "[CrossFilteringBehavior]": 1,
                    "[FromCardinality]": 2, "[ToCardinality]": 1
                }
            ]
        },
        "dependencies": [{"contains": "Margin", "tables": ["Sales"]}],
        "responses": [
            {"contains": "// baseline", "totals": [500, 200, 210, 205], "results": margin_results(0.25)},
            {"contains": "// rewrite fast", "totals": [300, 120, 100, 110], "results": margin_results(0.25)},
            {"contains": "// rewrite slow", "totals": [300, 150, 160, 170], "results": margin_results(0.25)},
            {"contains": "// rewrite different", "totals": [300, 190, 195, 199], "results": margin_results(0.3)},
            {"contains": "// broken warmup", "error_on_calls": [1]},
            {"contains": "// broken run2", "error_on_calls": [3]}
        ],
        "guidance": [
            {"title": "Prefer variables over repeated measure references", "url": null, "summary": null}
        ]
    })
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        call_timeout: Duration::from_secs(5),
        ..EngineConfig::default()
    }
}

pub fn engine_for(model: Value) -> (TuningEngine, Arc<FixtureBackend>) {
    let model: FixtureModel = serde_json::from_value(model).expect("fixture model should parse");
    let backend = Arc::new(FixtureBackend::from_model(model));
    let engine = TuningEngine::new(Collaborators::from_backend(backend.clone()), test_config());
    (engine, backend)
}

pub fn to_json(response: &daxtune::models::ToolResponse) -> Value {
    serde_json::to_value(response).expect("response should serialize")
}
