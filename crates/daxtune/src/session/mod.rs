use std::collections::BTreeMap;

use anyhow::{Result, bail};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::analysis::{BestSoFar, PerformanceAnalysis, SemanticAnalysis};
use crate::models::record::{QueryMode, QueryRecord, QueryResults};
use crate::models::trace::PerformanceSnapshot;
use crate::utils::time::now_utc;

pub const NO_SESSION_MESSAGE: &str = "no active session; connect to a dataset first";
pub const NO_CONNECTION_MESSAGE: &str = "session has no connection; reconnect to a dataset";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub endpoint: String,
    pub dataset_id: String,
    pub dataset_name: String,
    pub resolved_name: String,
    pub is_local: bool,
}

impl ConnectionInfo {
    #[must_use]
    pub fn has_target(&self) -> bool {
        !self.endpoint.trim().is_empty() && !self.dataset_id.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestOptimization {
    pub id: String,
    pub improvement_percent: f64,
    pub meets_threshold: bool,
    pub semantically_equivalent: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryData {
    pub original_query: Option<String>,
    pub enhanced_query: Option<String>,
    pub baseline: Option<QueryRecord>,
    pub optimizations: BTreeMap<usize, QueryRecord>,
    pub history: Vec<QueryRecord>,
    pub baseline_established: bool,
    pub baseline_performance: Option<PerformanceSnapshot>,
    pub original_baseline_performance: Option<PerformanceSnapshot>,

    #[serde(skip)]
    pub baseline_results: Option<Value>,

    pub best: Option<BestOptimization>,
}

impl QueryData {
    #[must_use]
    pub fn for_query(query: &str) -> Self {
        Self {
            original_query: Some(query.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn optimization(&self, id: &str) -> Option<&QueryRecord> {
        self.optimizations.values().find(|record| record.id == id)
    }

    #[must_use]
    pub fn next_optimization_number(&self) -> usize {
        self.optimizations
            .keys()
            .next_back()
            .map_or(1, |last| last + 1)
    }

    #[must_use]
    pub fn best_so_far(&self) -> Option<BestSoFar> {
        self.best.as_ref().map(|best| BestSoFar {
            id: best.id.clone(),
            improvement_percent: best.improvement_percent,
        })
    }

    #[must_use]
    pub fn summary(&self) -> Value {
        let failed = self.history.iter().filter(|record| !record.success).count();
        json!({
            "original_query": self.original_query,
            "enhanced_query": self.enhanced_query,
            "baseline_established": self.baseline_established,
            "baseline_total_ms": self.baseline_performance.as_ref().map(|p| p.total_ms),
            "original_baseline_total_ms": self
                .original_baseline_performance
                .as_ref()
                .map(|p| p.total_ms),
            "optimization_count": self.optimizations.len(),
            "execution_count": self.history.len(),
            "failed_execution_count": failed,
            "best_optimization": self.best,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub connection: ConnectionInfo,
    pub query_data: QueryData,
    pub created_at_utc: String,
    pub last_updated_utc: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionValidation {
    Valid(SessionState),
    NoSession,
    NoConnection(SessionState),
}

impl SessionValidation {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    #[must_use]
    pub fn message(&self) -> Option<&'static str> {
        match self {
            Self::Valid(_) => None,
            Self::NoSession => Some(NO_SESSION_MESSAGE),
            Self::NoConnection(_) => Some(NO_CONNECTION_MESSAGE),
        }
    }

    pub fn into_result(self) -> Result<SessionState> {
        match self {
            Self::Valid(state) => Ok(state),
            Self::NoSession => bail!(NO_SESSION_MESSAGE),
            Self::NoConnection(_) => bail!(NO_CONNECTION_MESSAGE),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionEvidence {
    pub performance: Option<PerformanceSnapshot>,
    pub rows: Value,
    pub performance_analysis: Option<PerformanceAnalysis>,
    pub semantic_analysis: Option<SemanticAnalysis>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedExecution {
    pub query: String,
    pub mode: QueryMode,
    pub outcome: std::result::Result<ExecutionEvidence, String>,
}

#[derive(Debug, Default)]
pub struct SessionManager {
    slot: Mutex<Option<SessionState>>,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_session(&self, connection: ConnectionInfo) -> SessionState {
        let now = now_utc();
        let state = SessionState {
            connection,
            query_data: QueryData::default(),
            created_at_utc: now.clone(),
            last_updated_utc: now,
        };

        let mut slot = self.slot.lock();
        if let Some(previous) = slot.as_ref() {
            debug!(
                endpoint = %previous.connection.endpoint,
                dataset = %previous.connection.dataset_name,
                "replacing existing session"
            );
        }
        *slot = Some(state.clone());
        info!(
            endpoint = %state.connection.endpoint,
            dataset = %state.connection.dataset_name,
            local = state.connection.is_local,
            "session created"
        );
        state
    }

    #[must_use]
    pub fn current_session(&self) -> Option<SessionState> {
        self.slot.lock().clone()
    }

    #[must_use]
    pub fn validate_session(&self) -> SessionValidation {
        match self.slot.lock().as_ref() {
            None => SessionValidation::NoSession,
            Some(state) if !state.connection.has_target() => {
                SessionValidation::NoConnection(state.clone())
            }
            Some(state) => SessionValidation::Valid(state.clone()),
        }
    }

    pub fn update_query_data<T>(&self, mutator: impl FnOnce(&mut QueryData) -> T) -> Result<T> {
        let mut slot = self.slot.lock();
        let Some(state) = slot.as_mut() else {
            bail!(NO_SESSION_MESSAGE);
        };
        let outcome = mutator(&mut state.query_data);
        state.last_updated_utc = now_utc();
        Ok(outcome)
    }

    pub fn establish_new_baseline(&self, query: &str) -> Result<()> {
        self.update_query_data(|data| {
            *data = QueryData::for_query(query);
        })?;
        debug!(query_len = query.len(), "new baseline cycle established");
        Ok(())
    }

    pub fn track_query_execution(&self, execution: TrackedExecution) -> Result<QueryRecord> {
        self.update_query_data(|data| {
            data.original_query
                .get_or_insert_with(|| execution.query.clone());

            let (id, sequence) = match execution.mode {
                QueryMode::Baseline => ("baseline".to_string(), None),
                QueryMode::Optimization => {
                    let sequence = data.next_optimization_number();
                    (format!("optimization_{sequence}"), Some(sequence))
                }
            };

            let record = match &execution.outcome {
                Ok(evidence) => QueryRecord {
                    id: id.clone(),
                    query: execution.query.clone(),
                    mode: execution.mode,
                    timestamp_utc: now_utc(),
                    success: true,
                    error: None,
                    results: QueryResults {
                        performance: evidence.performance.clone(),
                        rows: evidence.rows.clone(),
                        performance_analysis: evidence.performance_analysis.clone(),
                        semantic_analysis: evidence.semantic_analysis.clone(),
                    },
                },
                Err(error) => QueryRecord {
                    id: id.clone(),
                    query: execution.query.clone(),
                    mode: execution.mode,
                    timestamp_utc: now_utc(),
                    success: false,
                    error: Some(error.clone()),
                    results: QueryResults::default(),
                },
            };

            if let Ok(evidence) = &execution.outcome {
                match execution.mode {
                    QueryMode::Baseline => {
                        data.baseline = Some(record.clone());
                        data.baseline_established = true;
                        data.baseline_performance = evidence.performance.clone();
                        data.baseline_results = Some(evidence.rows.clone());
                        if let Some(performance) = &evidence.performance {
                            data.original_baseline_performance
                                .get_or_insert_with(|| performance.clone());
                        }
                    }
                    QueryMode::Optimization => {
                        if let Some(analysis) = &evidence.performance_analysis {
                            advance_best(data, &id, analysis, evidence.semantic_analysis.as_ref());
                        }
                    }
                }
            }

            if let Some(sequence) = sequence {
                data.optimizations.insert(sequence, record.clone());
            }
            data.history.push(record.clone());
            record
        })
    }
}

/// Best only moves on a strictly greater improvement, and only above zero.
fn advance_best(
    data: &mut QueryData,
    id: &str,
    analysis: &PerformanceAnalysis,
    semantic: Option<&SemanticAnalysis>,
) {
    let floor = data
        .best
        .as_ref()
        .map_or(0.0, |best| best.improvement_percent);
    if analysis.improvement_percent <= floor {
        return;
    }

    debug!(
        id,
        improvement_percent = analysis.improvement_percent,
        previous_percent = floor,
        "best optimization advanced"
    );
    data.best = Some(BestOptimization {
        id: id.to_string(),
        improvement_percent: analysis.improvement_percent,
        meets_threshold: analysis.meets_threshold,
        semantically_equivalent: semantic.map(|semantic| semantic.is_equivalent),
    });
}
