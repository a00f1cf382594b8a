use std::sync::Arc;

use tracing::{debug, info};

use super::{
    ConnectError, ConnectOutcome, ConnectRequest, DatasetMatch, DiscoveryListing,
    DiscoveryResponse, Topology, normalize_endpoint, remote_resolved_name, resolve_topology,
};
use crate::config::EngineConfig;
use crate::providers::{DatasetRef, Gateway, LocalInstance, QueryTarget, RemoteGroup};
use crate::session::{ConnectionInfo, SessionManager};

pub const SMOKE_TEST_QUERY: &str = "EVALUATE { 1 }";

#[derive(Clone)]
pub struct ConnectionService {
    gateway: Gateway,
    sessions: Arc<SessionManager>,
    config: EngineConfig,
}

impl ConnectionService {
    #[must_use]
    pub fn new(gateway: Gateway, sessions: Arc<SessionManager>, config: EngineConfig) -> Self {
        Self {
            gateway,
            sessions,
            config,
        }
    }

    pub async fn connect(&self, request: &ConnectRequest) -> Result<ConnectOutcome, ConnectError> {
        let topology = resolve_topology(request)?;
        debug!(topology = topology.as_str(), "connection topology resolved");
        match topology {
            Topology::Local => self.connect_local(request).await,
            Topology::Remote => self.connect_remote(request).await,
        }
    }

    async fn connect_local(&self, request: &ConnectRequest) -> Result<ConnectOutcome, ConnectError> {
        let endpoint = request
            .endpoint()
            .map(normalize_endpoint)
            .or_else(|| request.port.map(|port| format!("localhost:{port}")));

        match (endpoint, request.dataset()) {
            (Some(endpoint), Some(dataset)) => {
                let (dataset_id, dataset_name) =
                    self.identify_dataset(&endpoint, None, dataset).await;
                let resolved_name = self.local_display_name(&endpoint).await;
                self.establish(ConnectionInfo {
                    endpoint,
                    dataset_id,
                    dataset_name,
                    resolved_name,
                    is_local: true,
                })
                .await
            }
            (Some(endpoint), None) => {
                let datasets = self.list_local_datasets(&endpoint).await?;
                Ok(ConnectOutcome::Discovery(DiscoveryResponse {
                    topology: Topology::Local,
                    message: format!(
                        "{} dataset(s) available at {endpoint}; pass one to connect",
                        datasets.len()
                    ),
                    listing: DiscoveryListing::Datasets { endpoint, datasets },
                }))
            }
            (None, Some(dataset)) => {
                let instances = self.local_instances().await?;
                let matches = search_instances(&instances, dataset);
                match select_match(&matches, dataset) {
                    MatchSelection::One(found) => {
                        self.establish(ConnectionInfo {
                            endpoint: found.endpoint.clone(),
                            dataset_id: found.dataset.id.clone(),
                            dataset_name: found.dataset.name.clone(),
                            resolved_name: found.instance.clone(),
                            is_local: true,
                        })
                        .await
                    }
                    MatchSelection::None => Ok(ConnectOutcome::Discovery(DiscoveryResponse {
                        topology: Topology::Local,
                        message: format!(
                            "no local dataset matches `{dataset}`; available instances are listed"
                        ),
                        listing: DiscoveryListing::Instances(instances),
                    })),
                    MatchSelection::Ambiguous => Ok(ConnectOutcome::Discovery(DiscoveryResponse {
                        topology: Topology::Local,
                        message: format!(
                            "{} local datasets match `{dataset}`; pass an exact name, id or port",
                            matches.len()
                        ),
                        listing: DiscoveryListing::Matches(matches),
                    })),
                }
            }
            (None, None) => {
                let instances = self.local_instances().await?;
                Ok(ConnectOutcome::Discovery(DiscoveryResponse {
                    topology: Topology::Local,
                    message: format!(
                        "{} local instance(s) running; pass a dataset or port to connect",
                        instances.len()
                    ),
                    listing: DiscoveryListing::Instances(instances),
                }))
            }
        }
    }

    async fn connect_remote(&self, request: &ConnectRequest) -> Result<ConnectOutcome, ConnectError> {
        let (endpoint, resolved_name, token) = if let Some(endpoint) = request.endpoint() {
            let token = self.require_token().await?;
            let endpoint = normalize_endpoint(endpoint);
            let name = remote_resolved_name(&endpoint);
            (endpoint, name, token)
        } else if let Some(group) = request.group() {
            let token = self.require_token().await?;
            match self.resolve_group(group).await? {
                Some(found) => (self.group_endpoint(&found.name), found.name, token),
                None if request.dataset().is_some() => {
                    return Err(ConnectError::RemoteGroupNotFound {
                        group: group.to_string(),
                        available: self.remote_groups().await?,
                    });
                }
                None => {
                    let groups = self.remote_groups().await?;
                    return Ok(ConnectOutcome::Discovery(DiscoveryResponse {
                        topology: Topology::Remote,
                        message: format!(
                            "remote group `{group}` was not found; available groups are listed"
                        ),
                        listing: DiscoveryListing::Groups(groups),
                    }));
                }
            }
        } else if let Some(dataset) = request.dataset() {
            return Err(ConnectError::RemoteGroupRequired(dataset.to_string()));
        } else {
            let groups = self.remote_groups().await?;
            return Ok(ConnectOutcome::Discovery(DiscoveryResponse {
                topology: Topology::Remote,
                message: format!(
                    "{} remote group(s) available; pass a group to continue",
                    groups.len()
                ),
                listing: DiscoveryListing::Groups(groups),
            }));
        };

        let Some(dataset) = request.dataset() else {
            let datasets = self
                .gateway
                .list_databases(&endpoint, Some(&token))
                .await
                .map_err(|error| ConnectError::RemoteDiscoveryFailed(format!("{error:#}")))?;
            return Ok(ConnectOutcome::Discovery(DiscoveryResponse {
                topology: Topology::Remote,
                message: format!(
                    "{} dataset(s) available in `{resolved_name}`; pass one to connect",
                    datasets.len()
                ),
                listing: DiscoveryListing::Datasets { endpoint, datasets },
            }));
        };

        let (dataset_id, dataset_name) = self
            .identify_dataset(&endpoint, Some(&token), dataset)
            .await;

        self.establish(ConnectionInfo {
            endpoint,
            dataset_id,
            dataset_name,
            resolved_name,
            is_local: false,
        })
        .await
    }

    async fn identify_dataset(
        &self,
        endpoint: &str,
        token: Option<&str>,
        wanted: &str,
    ) -> (String, String) {
        let listed = match self.gateway.list_databases(endpoint, token).await {
            Ok(datasets) => datasets,
            Err(error) => {
                debug!(endpoint, error = %format!("{error:#}"), "dataset listing failed; connecting by name");
                Vec::new()
            }
        };
        match find_dataset(&listed, wanted) {
            Some(found) => (found.id.clone(), found.name.clone()),
            None => (wanted.to_string(), wanted.to_string()),
        }
    }

    fn group_endpoint(&self, group: &str) -> String {
        format!("{}/{group}", self.config.remote_endpoint_base)
    }

    async fn require_token(&self) -> Result<String, ConnectError> {
        match self.gateway.access_token().await {
            Ok(Some(token)) => Ok(token),
            Ok(None) => Err(ConnectError::NoAccessToken),
            Err(error) => {
                debug!(error = %format!("{error:#}"), "token acquisition failed");
                Err(ConnectError::NoAccessToken)
            }
        }
    }

    async fn remote_groups(&self) -> Result<Vec<RemoteGroup>, ConnectError> {
        self.gateway
            .list_remote_groups()
            .await
            .map_err(|error| ConnectError::RemoteDiscoveryFailed(format!("{error:#}")))
    }

    async fn resolve_group(&self, group: &str) -> Result<Option<RemoteGroup>, ConnectError> {
        let groups = self.remote_groups().await?;
        Ok(groups.into_iter().find(|candidate| {
            candidate.name.eq_ignore_ascii_case(group) || candidate.id.eq_ignore_ascii_case(group)
        }))
    }

    async fn list_local_datasets(&self, endpoint: &str) -> Result<Vec<DatasetRef>, ConnectError> {
        self.gateway
            .list_databases(endpoint, None)
            .await
            .map_err(|error| ConnectError::DatasetNotFound {
                endpoint: endpoint.to_string(),
                reason: format!("{error:#}"),
            })
    }

    async fn local_instances(&self) -> Result<Vec<LocalInstance>, ConnectError> {
        let mut instances = self
            .gateway
            .discover_local_instances()
            .await
            .map_err(|error| ConnectError::LocalDiscoveryFailed(format!("{error:#}")))?;
        if instances.is_empty() {
            return Err(ConnectError::NoLocalInstances);
        }
        for instance in instances.iter_mut().filter(|instance| instance.datasets.is_empty()) {
            match self.gateway.list_databases(&instance.endpoint(), None).await {
                Ok(datasets) => instance.datasets = datasets,
                Err(error) => debug!(
                    port = instance.port,
                    error = %format!("{error:#}"),
                    "dataset listing failed for local instance"
                ),
            }
        }
        Ok(instances)
    }

    async fn local_display_name(&self, endpoint: &str) -> String {
        match self.gateway.discover_local_instances().await {
            Ok(instances) => instances
                .into_iter()
                .find(|instance| instance.endpoint().eq_ignore_ascii_case(endpoint))
                .map_or_else(|| endpoint.to_string(), |instance| instance.display_name),
            Err(_) => endpoint.to_string(),
        }
    }

    async fn establish(&self, connection: ConnectionInfo) -> Result<ConnectOutcome, ConnectError> {
        if !connection.has_target() {
            return Err(ConnectError::SessionInitFailed(
                "connection has no endpoint or dataset".to_string(),
            ));
        }

        let token = if connection.is_local {
            None
        } else {
            Some(self.require_token().await?)
        };
        let target = QueryTarget {
            endpoint: connection.endpoint.clone(),
            dataset_id: connection.dataset_id.clone(),
            token,
        };
        self.smoke_test(&target)
            .await
            .map_err(|reason| ConnectError::ConnectionTestFailed {
                dataset: connection.dataset_name.clone(),
                endpoint: connection.endpoint.clone(),
                reason,
            })?;

        self.sessions.create_session(connection.clone());
        info!(
            endpoint = %connection.endpoint,
            dataset = %connection.dataset_name,
            "connected"
        );
        Ok(ConnectOutcome::Connected(connection))
    }

    async fn smoke_test(&self, target: &QueryTarget) -> Result<(), String> {
        let output = self
            .gateway
            .run_trace(target, SMOKE_TEST_QUERY)
            .await
            .map_err(|error| format!("{error:#}"))?;
        if let Some(error) = output.server_error {
            return Err(format!("server error: {error}"));
        }
        let rows = output.first_rows().map_err(|error| format!("{error:#}"))?;
        if rows.is_empty() {
            return Err("test query returned no rows".to_string());
        }
        Ok(())
    }
}

fn find_dataset<'a>(datasets: &'a [DatasetRef], wanted: &str) -> Option<&'a DatasetRef> {
    datasets.iter().find(|dataset| {
        dataset.name.eq_ignore_ascii_case(wanted) || dataset.id.eq_ignore_ascii_case(wanted)
    })
}

fn search_instances(instances: &[LocalInstance], needle: &str) -> Vec<DatasetMatch> {
    let needle = needle.to_lowercase();
    instances
        .iter()
        .flat_map(|instance| {
            instance
                .datasets
                .iter()
                .filter(|dataset| {
                    dataset.name.to_lowercase().contains(&needle)
                        || dataset.id.to_lowercase().contains(&needle)
                })
                .map(|dataset| DatasetMatch {
                    endpoint: instance.endpoint(),
                    instance: instance.display_name.clone(),
                    dataset: dataset.clone(),
                })
        })
        .collect()
}

enum MatchSelection<'a> {
    None,
    One(&'a DatasetMatch),
    Ambiguous,
}

/// A single substring hit connects; among several, a lone exact hit wins.
fn select_match<'a>(matches: &'a [DatasetMatch], wanted: &str) -> MatchSelection<'a> {
    match matches {
        [] => MatchSelection::None,
        [only] => MatchSelection::One(only),
        _ => {
            let exact = matches
                .iter()
                .filter(|candidate| {
                    candidate.dataset.name.eq_ignore_ascii_case(wanted)
                        || candidate.dataset.id.eq_ignore_ascii_case(wanted)
                })
                .collect::<Vec<_>>();
            match exact.as_slice() {
                [only] => MatchSelection::One(*only),
                _ => MatchSelection::Ambiguous,
            }
        }
    }
}
