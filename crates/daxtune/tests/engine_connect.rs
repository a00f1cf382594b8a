mod common;

use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use common::{engine_for, sales_model, test_config, to_json};
use daxtune::TuningEngine;
use daxtune::connection::{ConnectRequest, SMOKE_TEST_QUERY};
use daxtune::providers::fixture::FixtureBackend;
use daxtune::providers::{Collaborators, DatasetRef, Discovery, LocalInstance, RemoteGroup};
use serde_json::json;

fn request(value: serde_json::Value) -> ConnectRequest {
    serde_json::from_value(value).expect("request should parse")
}

#[tokio::test]
async fn single_local_match_connects_and_creates_session() {
    let (engine, _) = engine_for(sales_model());
    let response = to_json(&engine.connect(&request(json!({"dataset": "sales model"}))).await);

    assert_eq!(response["status"], "success");
    assert_eq!(response["action"], "connected");
    assert_eq!(response["session"]["endpoint"], "localhost:51000");
    assert_eq!(response["session"]["dataset_id"], "sales-model-id");
    assert_eq!(response["session"]["resolved_name"], "Sales Model.pbix");
    assert_eq!(response["session"]["is_local"], true);
    assert!(engine.sessions().validate_session().is_valid());
}

#[tokio::test]
async fn ambiguous_local_search_lists_matches() {
    let (engine, _) = engine_for(sales_model());
    let response = to_json(&engine.connect(&request(json!({"dataset": "ales"}))).await);

    assert_eq!(response["status"], "success");
    assert_eq!(response["action"], "discovery");
    assert_eq!(response["topology"], "local");
    assert_eq!(response["matches"].as_array().map(Vec::len), Some(3));
    assert!(engine.sessions().current_session().is_none());
}

#[tokio::test]
async fn exact_name_breaks_a_substring_tie() {
    let (engine, _) = engine_for(sales_model());
    let response = to_json(&engine.connect(&request(json!({"dataset": "SALES"}))).await);

    assert_eq!(response["action"], "connected");
    assert_eq!(response["session"]["endpoint"], "localhost:52000");
    assert_eq!(response["session"]["dataset_id"], "sales-id");
}

#[tokio::test]
async fn unmatched_dataset_lists_instances() {
    let (engine, _) = engine_for(sales_model());
    let response = to_json(&engine.connect(&request(json!({"dataset": "Inventory"}))).await);

    assert_eq!(response["action"], "discovery");
    assert_eq!(response["instances"].as_array().map(Vec::len), Some(2));
    assert!(response["message"].as_str().is_some_and(|m| m.contains("Inventory")));
}

#[tokio::test]
async fn bare_request_lists_local_instances() {
    let (engine, _) = engine_for(sales_model());
    let response = to_json(&engine.connect(&ConnectRequest::default()).await);

    assert_eq!(response["action"], "discovery");
    assert_eq!(response["instances"][1]["datasets"][1]["name"], "Sales");
}

#[tokio::test]
async fn port_without_dataset_lists_its_datasets() {
    let (engine, _) = engine_for(sales_model());
    let response = to_json(&engine.connect(&request(json!({"port": 52000}))).await);

    assert_eq!(response["action"], "discovery");
    assert_eq!(response["endpoint"], "localhost:52000");
    assert_eq!(response["datasets"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn unreachable_endpoint_fails_the_connection_test() {
    let (engine, _) = engine_for(sales_model());
    let response = to_json(
        &engine
            .connect(&request(json!({"endpoint": "Data Source=localhost:59999", "dataset": "Sales"})))
            .await,
    );

    assert_eq!(response["status"], "error");
    assert_eq!(response["error_code"], "connection_test_failed");
    assert_eq!(response["details"]["endpoint"], "localhost:59999");
    assert_eq!(response["details"]["dataset"], "Sales");
}

/// Serves instances and groups from the fixture but cannot enumerate datasets.
struct NoDatasetListing(Arc<FixtureBackend>);

#[async_trait]
impl Discovery for NoDatasetListing {
    async fn discover_local_instances(&self) -> Result<Vec<LocalInstance>> {
        self.0.discover_local_instances().await
    }

    async fn list_databases(&self, endpoint: &str, _token: Option<&str>) -> Result<Vec<DatasetRef>> {
        bail!("catalog rowset is not exposed at {endpoint}")
    }

    async fn list_remote_groups(&self) -> Result<Vec<RemoteGroup>> {
        self.0.list_remote_groups().await
    }
}

#[tokio::test]
async fn endpoint_connects_by_id_when_datasets_cannot_be_listed() {
    let (_, backend) = engine_for(sales_model());
    let mut collaborators = Collaborators::from_backend(backend.clone());
    collaborators.discovery = Arc::new(NoDatasetListing(backend.clone()));
    let engine = TuningEngine::new(collaborators, test_config());

    let response = to_json(
        &engine
            .connect(&request(json!({"endpoint": "localhost:52000", "dataset": "sales-id"})))
            .await,
    );

    assert_eq!(response["status"], "success");
    assert_eq!(response["action"], "connected");
    assert_eq!(response["session"]["dataset_id"], "sales-id");
    assert_eq!(response["session"]["dataset_name"], "sales-id");
    assert_eq!(response["session"]["resolved_name"], "Archive.pbix");
    assert_eq!(backend.executed_queries(), vec![SMOKE_TEST_QUERY.to_string()]);
}

#[tokio::test]
async fn failing_smoke_test_names_dataset_and_endpoint() {
    let (engine, _) = engine_for(sales_model());
    let response = to_json(
        &engine
            .connect(&request(json!({"port": 51000, "dataset": "Missing Model"})))
            .await,
    );

    assert_eq!(response["error_code"], "connection_test_failed");
    let message = response["error"].as_str().expect("error message");
    assert!(message.contains("Missing Model"));
    assert!(message.contains("localhost:51000"));
    assert!(engine.sessions().current_session().is_none());
}

#[tokio::test]
async fn no_running_instances_is_a_distinct_error() {
    let (engine, _) = engine_for(json!({}));
    let response = to_json(&engine.connect(&ConnectRequest::default()).await);
    assert_eq!(response["error_code"], "no_local_instances");
}

#[tokio::test]
async fn invalid_topology_touches_no_collaborator() {
    let (engine, backend) = engine_for(sales_model());
    let response = to_json(
        &engine
            .connect(&request(json!({"topology": "cloud", "dataset": "Sales"})))
            .await,
    );

    assert_eq!(response["status"], "error");
    assert_eq!(response["error_code"], "invalid_topology");
    assert_eq!(backend.collaborator_calls(), 0);
}

#[tokio::test]
async fn remote_dataset_without_group_is_rejected_up_front() {
    let (engine, backend) = engine_for(sales_model());
    let response = to_json(
        &engine
            .connect(&request(json!({"topology": "remote", "dataset": "Budget"})))
            .await,
    );

    assert_eq!(response["error_code"], "remote_group_required");
    assert_eq!(backend.collaborator_calls(), 0);
}

#[tokio::test]
async fn remote_group_and_dataset_connect_through_the_endpoint_base() {
    let (engine, _) = engine_for(sales_model());
    let response = to_json(
        &engine
            .connect(&request(json!({"group": "finance", "dataset": "budget"})))
            .await,
    );

    assert_eq!(response["action"], "connected");
    assert_eq!(
        response["session"]["endpoint"],
        "powerbi://api.powerbi.com/v1.0/myorg/Finance"
    );
    assert_eq!(response["session"]["dataset_id"], "budget-id");
    assert_eq!(response["session"]["dataset_name"], "Budget");
    assert_eq!(response["session"]["resolved_name"], "Finance");
    assert_eq!(response["session"]["is_local"], false);
}

#[tokio::test]
async fn remote_listings_cover_groups_and_datasets() {
    let (engine, _) = engine_for(sales_model());

    let groups = to_json(&engine.connect(&request(json!({"topology": "remote"}))).await);
    assert_eq!(groups["action"], "discovery");
    assert_eq!(groups["groups"].as_array().map(Vec::len), Some(2));

    let datasets = to_json(&engine.connect(&request(json!({"group": "Finance"}))).await);
    assert_eq!(datasets["datasets"][0]["id"], "budget-id");

    let fallback = to_json(&engine.connect(&request(json!({"group": "Marketing"}))).await);
    assert_eq!(fallback["action"], "discovery");
    assert_eq!(fallback["groups"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn unknown_group_with_dataset_lists_available_groups() {
    let (engine, _) = engine_for(sales_model());
    let response = to_json(
        &engine
            .connect(&request(json!({"group": "Marketing", "dataset": "Budget"})))
            .await,
    );

    assert_eq!(response["error_code"], "remote_group_not_found");
    assert_eq!(response["details"]["available_groups"][0]["name"], "Finance");
}

#[tokio::test]
async fn remote_connection_requires_a_token() {
    let mut model = sales_model();
    model["access_token"] = serde_json::Value::Null;
    let (engine, _) = engine_for(model);
    let response = to_json(
        &engine
            .connect(&request(json!({"group": "Finance", "dataset": "Budget"})))
            .await,
    );

    assert_eq!(response["error_code"], "no_access_token");
}

#[tokio::test]
async fn reconnecting_replaces_the_session() {
    let (engine, _) = engine_for(sales_model());
    engine.connect(&request(json!({"dataset": "Sales Model"}))).await;
    engine
        .connect(&request(json!({"group": "Finance", "dataset": "Budget"})))
        .await;

    let state = engine.sessions().current_session().expect("session");
    assert_eq!(state.connection.dataset_id, "budget-id");
    assert!(state.query_data.history.is_empty());
}
