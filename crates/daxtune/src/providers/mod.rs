use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::models::trace::TraceOutput;
use crate::session::ConnectionInfo;

pub mod fixture;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRef {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalInstance {
    pub port: u16,
    pub display_name: String,

    #[serde(default)]
    pub datasets: Vec<DatasetRef>,
}

impl LocalInstance {
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("localhost:{}", self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteGroup {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidanceArticle {
    pub title: String,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub summary: Option<String>,
}

#[async_trait]
pub trait TraceRunner: Send + Sync {
    async fn run_trace(
        &self,
        token: Option<&str>,
        endpoint: &str,
        dataset_id: &str,
        query: &str,
    ) -> Result<Value>;
}

#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover_local_instances(&self) -> Result<Vec<LocalInstance>>;

    async fn list_databases(&self, endpoint: &str, token: Option<&str>) -> Result<Vec<DatasetRef>>;

    async fn list_remote_groups(&self) -> Result<Vec<RemoteGroup>>;
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Option<String>;
}

#[async_trait]
pub trait GuidanceProvider: Send + Sync {
    async fn fetch_guidance(&self, query: &str) -> Result<Vec<GuidanceArticle>>;
}

#[derive(Clone)]
pub struct Collaborators {
    pub trace: Arc<dyn TraceRunner>,
    pub discovery: Arc<dyn Discovery>,
    pub tokens: Arc<dyn TokenProvider>,
    pub guidance: Arc<dyn GuidanceProvider>,
}

impl Collaborators {
    #[must_use]
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: TraceRunner + Discovery + TokenProvider + GuidanceProvider + 'static,
    {
        Self {
            trace: backend.clone(),
            discovery: backend.clone(),
            tokens: backend.clone(),
            guidance: backend,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTarget {
    pub endpoint: String,
    pub dataset_id: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuidanceOutcome {
    Available(Vec<GuidanceArticle>),
    Unavailable(String),
}

impl GuidanceOutcome {
    #[must_use]
    pub fn to_payload(&self) -> Value {
        match self {
            Self::Available(articles) => json!({
                "status": "success",
                "article_count": articles.len(),
                "articles": articles,
            }),
            Self::Unavailable(error) => json!({
                "status": "error",
                "error": error,
            }),
        }
    }
}

#[derive(Clone)]
pub struct Gateway {
    collaborators: Collaborators,
    call_timeout: Duration,
}

impl Gateway {
    #[must_use]
    pub fn new(collaborators: Collaborators, call_timeout: Duration) -> Self {
        Self {
            collaborators,
            call_timeout,
        }
    }

    pub async fn access_token(&self) -> Result<Option<String>> {
        let tokens = self.collaborators.tokens.clone();
        with_timeout(self.call_timeout, "token acquisition", async move {
            Ok(tokens.access_token().await)
        })
        .await
    }

    /// Remote connections need a token for every call; local ones never do.
    pub async fn target_for(&self, connection: &ConnectionInfo) -> Result<QueryTarget> {
        let token = if connection.is_local {
            None
        } else {
            let token = self.access_token().await?;
            if token.is_none() {
                bail!("no access token available for remote endpoint {}", connection.endpoint);
            }
            token
        };

        Ok(QueryTarget {
            endpoint: connection.endpoint.clone(),
            dataset_id: connection.dataset_id.clone(),
            token,
        })
    }

    pub async fn run_trace(&self, target: &QueryTarget, query: &str) -> Result<TraceOutput> {
        let raw = with_timeout(
            self.call_timeout,
            "trace execution",
            self.collaborators.trace.run_trace(
                target.token.as_deref(),
                &target.endpoint,
                &target.dataset_id,
                query,
            ),
        )
        .await?;
        TraceOutput::parse(&raw).context("trace output could not be parsed")
    }

    pub async fn run_rows(&self, target: &QueryTarget, query: &str) -> Result<Vec<Value>> {
        let output = self.run_trace(target, query).await?;
        if let Some(error) = output.server_error {
            bail!("server rejected query: {error}");
        }
        output.first_rows()
    }

    pub async fn discover_local_instances(&self) -> Result<Vec<LocalInstance>> {
        with_timeout(
            self.call_timeout,
            "local instance discovery",
            self.collaborators.discovery.discover_local_instances(),
        )
        .await
    }

    pub async fn list_databases(
        &self,
        endpoint: &str,
        token: Option<&str>,
    ) -> Result<Vec<DatasetRef>> {
        with_timeout(
            self.call_timeout,
            "dataset listing",
            self.collaborators.discovery.list_databases(endpoint, token),
        )
        .await
    }

    pub async fn list_remote_groups(&self) -> Result<Vec<RemoteGroup>> {
        with_timeout(
            self.call_timeout,
            "remote group listing",
            self.collaborators.discovery.list_remote_groups(),
        )
        .await
    }

    pub async fn fetch_guidance(&self, query: &str) -> GuidanceOutcome {
        let outcome = with_timeout(
            self.call_timeout,
            "guidance lookup",
            self.collaborators.guidance.fetch_guidance(query),
        )
        .await;
        match outcome {
            Ok(articles) => GuidanceOutcome::Available(articles),
            Err(error) => GuidanceOutcome::Unavailable(format!("{error:#}")),
        }
    }
}

async fn with_timeout<T>(
    budget: Duration,
    label: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(budget, call)
        .await
        .map_err(|_| anyhow!("{label} timed out after {}ms", budget.as_millis()))?
}
