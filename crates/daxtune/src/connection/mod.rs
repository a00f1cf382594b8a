use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::config::is_remote_url;
use crate::providers::{DatasetRef, LocalInstance, RemoteGroup};
use crate::session::ConnectionInfo;

mod service;

pub use service::{ConnectionService, SMOKE_TEST_QUERY};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub topology: Option<String>,
}

impl ConnectRequest {
    pub(crate) fn dataset(&self) -> Option<&str> {
        non_blank(self.dataset.as_deref())
    }

    pub(crate) fn group(&self) -> Option<&str> {
        non_blank(self.group.as_deref())
    }

    pub(crate) fn endpoint(&self) -> Option<&str> {
        non_blank(self.endpoint.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    Local,
    Remote,
}

impl Topology {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// Explicit hint, then port, then group, then a remote-scheme endpoint; local otherwise.
pub fn resolve_topology(request: &ConnectRequest) -> Result<Topology, ConnectError> {
    if let Some(hint) = non_blank(request.topology.as_deref()) {
        return match hint.to_ascii_lowercase().as_str() {
            "local" => Ok(Topology::Local),
            "remote" => Ok(Topology::Remote),
            _ => Err(ConnectError::InvalidTopology(hint.to_string())),
        };
    }
    if request.port.is_some() {
        return Ok(Topology::Local);
    }
    if request.group().is_some() {
        return Ok(Topology::Remote);
    }
    if request.endpoint().is_some_and(is_remote_url) {
        return Ok(Topology::Remote);
    }
    Ok(Topology::Local)
}

#[must_use]
pub fn normalize_endpoint(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_prefix = match trimmed.get(..12) {
        Some(prefix) if prefix.eq_ignore_ascii_case("data source=") => &trimmed[12..],
        _ => trimmed,
    };
    without_prefix
        .trim()
        .trim_end_matches(';')
        .trim()
        .to_string()
}

#[must_use]
pub fn remote_resolved_name(endpoint: &str) -> String {
    endpoint
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(endpoint)
        .to_string()
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("unrecognized topology `{0}`; expected `local` or `remote`")]
    InvalidTopology(String),

    #[error("no running local instances were found")]
    NoLocalInstances,

    #[error("local instance discovery failed: {0}")]
    LocalDiscoveryFailed(String),

    #[error("datasets at {endpoint} could not be listed: {reason}")]
    DatasetNotFound { endpoint: String, reason: String },

    #[error("remote group `{group}` was not found")]
    RemoteGroupNotFound {
        group: String,
        available: Vec<RemoteGroup>,
    },

    #[error("remote dataset `{0}` needs a group or endpoint to locate it")]
    RemoteGroupRequired(String),

    #[error("remote discovery failed: {0}")]
    RemoteDiscoveryFailed(String),

    #[error("no access token is available for the remote service")]
    NoAccessToken,

    #[error("connection test failed for dataset `{dataset}` at {endpoint}: {reason}")]
    ConnectionTestFailed {
        dataset: String,
        endpoint: String,
        reason: String,
    },

    #[error("session could not be initialized: {0}")]
    SessionInitFailed(String),
}

impl ConnectError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidTopology(_) => "invalid_topology",
            Self::NoLocalInstances => "no_local_instances",
            Self::LocalDiscoveryFailed(_) => "local_discovery_failed",
            Self::DatasetNotFound { .. } => "dataset_not_found",
            Self::RemoteGroupNotFound { .. } => "remote_group_not_found",
            Self::RemoteGroupRequired(_) => "remote_group_required",
            Self::RemoteDiscoveryFailed(_) => "remote_discovery_failed",
            Self::NoAccessToken => "no_access_token",
            Self::ConnectionTestFailed { .. } => "connection_test_failed",
            Self::SessionInitFailed(_) => "session_init_failed",
        }
    }

    #[must_use]
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::RemoteGroupNotFound { available, .. } => Some(json!({ "available_groups": available })),
            Self::ConnectionTestFailed {
                dataset, endpoint, ..
            } => Some(json!({ "dataset": dataset, "endpoint": endpoint })),
            Self::DatasetNotFound { endpoint, .. } => Some(json!({ "endpoint": endpoint })),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetMatch {
    pub endpoint: String,
    pub instance: String,
    pub dataset: DatasetRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryListing {
    Instances(Vec<LocalInstance>),
    Datasets {
        endpoint: String,
        datasets: Vec<DatasetRef>,
    },
    Groups(Vec<RemoteGroup>),
    Matches(Vec<DatasetMatch>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResponse {
    pub topology: Topology,
    pub message: String,
    pub listing: DiscoveryListing,
}

impl DiscoveryResponse {
    #[must_use]
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("action".to_string(), json!("discovery"));
        fields.insert("topology".to_string(), json!(self.topology));
        fields.insert("message".to_string(), json!(self.message));
        match &self.listing {
            DiscoveryListing::Instances(instances) => {
                fields.insert("instances".to_string(), json!(instances));
            }
            DiscoveryListing::Datasets { endpoint, datasets } => {
                fields.insert("endpoint".to_string(), json!(endpoint));
                fields.insert("datasets".to_string(), json!(datasets));
            }
            DiscoveryListing::Groups(groups) => {
                fields.insert("groups".to_string(), json!(groups));
            }
            DiscoveryListing::Matches(matches) => {
                fields.insert("matches".to_string(), json!(matches));
            }
        }
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected(ConnectionInfo),
    Discovery(DiscoveryResponse),
}
