use std::sync::Arc;

use serde_json::{Value, json};
use tracing::warn;

use crate::config::EngineConfig;
use crate::connection::{ConnectOutcome, ConnectRequest, ConnectionService};
use crate::execution::{ExecutionReport, ExecutionService};
use crate::models::record::QueryMode;
use crate::models::response::ToolResponse;
use crate::providers::{Collaborators, Gateway};
use crate::session::{NO_SESSION_MESSAGE, SessionManager, SessionValidation};

pub const CONNECT_OPERATION: &str = "connect";
pub const EXECUTE_OPERATION: &str = "execute_query";
pub const PREPARE_OPERATION: &str = "prepare_query";
pub const STATUS_OPERATION: &str = "session_status";

pub struct TuningEngine {
    sessions: Arc<SessionManager>,
    connections: ConnectionService,
    executions: ExecutionService,
}

impl TuningEngine {
    #[must_use]
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Self {
        let gateway = Gateway::new(collaborators, config.call_timeout);
        let sessions = Arc::new(SessionManager::new());
        Self {
            connections: ConnectionService::new(gateway.clone(), sessions.clone(), config.clone()),
            executions: ExecutionService::new(gateway, sessions.clone(), config),
            sessions,
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub async fn connect(&self, request: &ConnectRequest) -> ToolResponse {
        match self.connections.connect(request).await {
            Ok(ConnectOutcome::Connected(connection)) => ToolResponse::success(CONNECT_OPERATION)
                .with_field("action", json!("connected"))
                .with_field("session", json!(connection)),
            Ok(ConnectOutcome::Discovery(discovery)) => {
                ToolResponse::success(CONNECT_OPERATION).with_fields(discovery.to_fields())
            }
            Err(error) => {
                warn!(code = error.code(), error = %error, "connect failed");
                let response = ToolResponse::error(CONNECT_OPERATION, error.code(), error.to_string());
                match error.details() {
                    Some(details) => response.with_error_details(details),
                    None => response,
                }
            }
        }
    }

    pub async fn execute_query(&self, query: &str, mode: &str) -> ToolResponse {
        if query.trim().is_empty() {
            return ToolResponse::error(EXECUTE_OPERATION, "invalid_input", "query text is empty");
        }
        let mode = match mode.parse::<QueryMode>() {
            Ok(mode) => mode,
            Err(error) => {
                return ToolResponse::error(EXECUTE_OPERATION, "invalid_input", error.to_string());
            }
        };
        if let Some(response) = session_error(EXECUTE_OPERATION, &self.sessions.validate_session()) {
            return response;
        }

        match self.executions.execute(query, mode).await {
            Ok(report) => execution_response(&report),
            Err(error) => {
                ToolResponse::error(EXECUTE_OPERATION, "execution_failed", format!("{error:#}"))
            }
        }
    }

    pub async fn prepare_query(&self, query: &str) -> ToolResponse {
        if query.trim().is_empty() {
            return ToolResponse::error(PREPARE_OPERATION, "invalid_input", "query text is empty");
        }
        if let Some(response) = session_error(PREPARE_OPERATION, &self.sessions.validate_session()) {
            return response;
        }

        let report = match self.executions.prepare(query).await {
            Ok(report) => report,
            Err(error) => {
                return ToolResponse::error(PREPARE_OPERATION, "prepare_failed", format!("{error:#}"));
            }
        };

        let baseline = &report.baseline.record;
        let function_names = report
            .inlining
            .functions
            .iter()
            .map(|function| function.name.as_str())
            .collect::<Vec<_>>();
        let measure_names = report
            .inlining
            .measures
            .iter()
            .map(|measure| measure.name.as_str())
            .collect::<Vec<_>>();
        let response = if baseline.success {
            ToolResponse::success(PREPARE_OPERATION)
        } else {
            ToolResponse::error(
                PREPARE_OPERATION,
                "baseline_failed",
                baseline.error.clone().unwrap_or_default(),
            )
        };

        response
            .with_field("original_query", json!(query))
            .with_field("enhanced_query", json!(report.inlining.query))
            .with_field("inlined_function_count", json!(report.inlining.functions.len()))
            .with_field("inlined_measure_count", json!(report.inlining.measures.len()))
            .with_field("inlined_functions", json!(function_names))
            .with_field("inlined_measures", json!(measure_names))
            .with_field("ambiguous_definitions", json!(report.inlining.ambiguous))
            .with_field("baseline", json!(baseline))
            .with_field("runs", json!(report.baseline.runs))
            .with_field("fastest_run", json!(report.baseline.fastest_run))
            .with_field("scoped_metadata", report.metadata.clone())
            .with_field("guidance", report.guidance.clone())
            .with_warnings(report.warnings.iter().cloned())
            .with_warnings(report.baseline.warnings.iter().cloned())
    }

    #[must_use]
    pub fn session_status(&self) -> ToolResponse {
        let Some(state) = self.sessions.current_session() else {
            return ToolResponse::error(STATUS_OPERATION, "no_session", NO_SESSION_MESSAGE);
        };

        let attempts = state
            .query_data
            .optimizations
            .values()
            .map(|record| {
                json!({
                    "id": record.id,
                    "success": record.success,
                    "total_ms": record.results.performance.as_ref().map(|p| p.total_ms),
                    "improvement_percent": record
                        .results
                        .performance_analysis
                        .as_ref()
                        .map(|a| a.improvement_percent),
                    "semantically_equivalent": record
                        .results
                        .semantic_analysis
                        .as_ref()
                        .map(|s| s.is_equivalent),
                    "error": record.error,
                })
            })
            .collect::<Vec<_>>();

        ToolResponse::success(STATUS_OPERATION)
            .with_field("connected", json!(state.connection.has_target()))
            .with_field("connection", json!(state.connection))
            .with_field("created_at_utc", json!(state.created_at_utc))
            .with_field("last_updated_utc", json!(state.last_updated_utc))
            .with_field("query", state.query_data.summary())
            .with_field("optimizations", Value::Array(attempts))
    }
}

fn session_error(operation: &str, validation: &SessionValidation) -> Option<ToolResponse> {
    let code = match validation {
        SessionValidation::Valid(_) => return None,
        SessionValidation::NoSession => "no_session",
        SessionValidation::NoConnection(_) => "no_connection",
    };
    validation
        .message()
        .map(|message| ToolResponse::error(operation, code, message))
}

fn execution_response(report: &ExecutionReport) -> ToolResponse {
    let record = &report.record;
    let response = if record.success {
        ToolResponse::success(EXECUTE_OPERATION)
    } else {
        ToolResponse::error(
            EXECUTE_OPERATION,
            "execution_failed",
            record.error.clone().unwrap_or_default(),
        )
    };

    response
        .with_field("query_id", json!(record.id))
        .with_field("mode", json!(record.mode))
        .with_field("performance", json!(record.results.performance))
        .with_field("performance_analysis", json!(record.results.performance_analysis))
        .with_field("semantic_analysis", json!(record.results.semantic_analysis))
        .with_field("runs", json!(report.runs))
        .with_field("fastest_run", json!(report.fastest_run))
        .with_field("results", record.results.rows.clone())
        .with_warnings(report.warnings.iter().cloned())
}
