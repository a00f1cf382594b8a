use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::analysis::{analyze_performance, select_fastest_run, semantic_equivalence};
use crate::config::EngineConfig;
use crate::inline::{InliningResult, inline_dependencies};
use crate::metadata::MetadataService;
use crate::models::record::{QueryMode, QueryRecord};
use crate::models::response::ResponseWarning;
use crate::models::trace::{TimedRun, TraceOutput};
use crate::providers::{Gateway, QueryTarget};
use crate::session::{ExecutionEvidence, SessionManager, TrackedExecution};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_number: usize,
    pub total_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub record: QueryRecord,
    pub runs: Vec<RunSummary>,
    pub fastest_run: Option<usize>,
    pub warnings: Vec<ResponseWarning>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrepareReport {
    pub inlining: InliningResult,
    pub baseline: ExecutionReport,
    pub metadata: Value,
    pub guidance: Value,
    pub warnings: Vec<ResponseWarning>,
}

fn warning(code: &str, message: impl Into<String>) -> ResponseWarning {
    ResponseWarning {
        code: code.to_string(),
        message: message.into(),
    }
}

#[derive(Clone)]
pub struct ExecutionService {
    gateway: Gateway,
    sessions: Arc<SessionManager>,
    metadata: MetadataService,
    config: EngineConfig,
}

impl ExecutionService {
    #[must_use]
    pub fn new(gateway: Gateway, sessions: Arc<SessionManager>, config: EngineConfig) -> Self {
        Self {
            metadata: MetadataService::new(gateway.clone()),
            gateway,
            sessions,
            config,
        }
    }

    /// One untimed warm-up, then `timed_runs` repetitions, strictly in sequence.
    /// Any transport failure or server-side error aborts the whole attempt.
    pub async fn run_timed(&self, target: &QueryTarget, query: &str) -> Result<Vec<TimedRun>> {
        self.run_once(target, query)
            .await
            .map_err(|error| anyhow!("warm-up failed: {error}"))?;

        let mut runs = Vec::with_capacity(self.config.timed_runs);
        for run_number in 1..=self.config.timed_runs {
            let output = self
                .run_once(target, query)
                .await
                .map_err(|error| anyhow!("run {run_number} failed: {error}"))?;
            debug!(run_number, total_ms = ?output.total_ms(), "timed run completed");
            runs.push(TimedRun { run_number, output });
        }
        Ok(runs)
    }

    async fn run_once(&self, target: &QueryTarget, query: &str) -> Result<TraceOutput, String> {
        let output = self
            .gateway
            .run_trace(target, query)
            .await
            .map_err(|error| format!("{error:#}"))?;
        match output.server_error {
            Some(error) => Err(error),
            None => Ok(output),
        }
    }

    pub async fn execute(&self, query: &str, mode: QueryMode) -> Result<ExecutionReport> {
        let state = self.sessions.validate_session().into_result()?;
        let mut warnings = Vec::new();
        let mut runs = Vec::new();
        let mut fastest_run = None;

        let measured = async {
            let target = self
                .gateway
                .target_for(&state.connection)
                .await
                .map_err(|error| format!("{error:#}"))?;
            let timed = self
                .run_timed(&target, query)
                .await
                .map_err(|error| error.to_string())?;
            runs = timed
                .iter()
                .map(|run| RunSummary {
                    run_number: run.run_number,
                    total_ms: run.output.total_ms(),
                })
                .collect();
            let fastest = select_fastest_run(&timed).map_err(|error| error.to_string())?;
            fastest_run = Some(fastest.run_number);
            Ok::<_, String>((
                fastest.run_number,
                fastest.output.performance.clone(),
                fastest.output.results.clone(),
            ))
        }
        .await;

        let outcome = measured.map(|(run_number, performance, rows)| {
            if performance.is_none() {
                warnings.push(warning(
                    "no_performance_totals",
                    format!("run {run_number} reported no performance totals; timings were not recorded"),
                ));
            }
            let mut evidence = ExecutionEvidence {
                performance,
                rows,
                performance_analysis: None,
                semantic_analysis: None,
            };
            if mode == QueryMode::Optimization {
                self.compare_with_baseline(&mut evidence, &mut warnings);
            }
            evidence
        });

        match &outcome {
            Ok(evidence) => info!(
                %mode,
                total_ms = ?evidence.performance.as_ref().map(|p| p.total_ms),
                improvement_percent = ?evidence.performance_analysis.as_ref().map(|a| a.improvement_percent),
                "query executed"
            ),
            Err(error) => warn!(%mode, error = %error, "query execution failed"),
        }

        let record = self.sessions.track_query_execution(TrackedExecution {
            query: query.to_string(),
            mode,
            outcome,
        })?;

        Ok(ExecutionReport {
            record,
            runs,
            fastest_run,
            warnings,
        })
    }

    fn compare_with_baseline(
        &self,
        evidence: &mut ExecutionEvidence,
        warnings: &mut Vec<ResponseWarning>,
    ) {
        let Some(data) = self.sessions.current_session().map(|state| state.query_data) else {
            return;
        };
        if !data.baseline_established {
            warnings.push(warning(
                "no_baseline",
                "no baseline has been established; improvement cannot be measured",
            ));
            return;
        }

        if let (Some(baseline), Some(current)) =
            (data.baseline_performance.as_ref(), evidence.performance.as_ref())
        {
            evidence.performance_analysis = Some(analyze_performance(
                baseline,
                data.original_baseline_performance.as_ref(),
                current,
                self.config.improvement_threshold_percent,
                data.best_so_far(),
            ));
        }
        evidence.semantic_analysis = data
            .baseline_results
            .as_ref()
            .map(|reference| semantic_equivalence(reference, &evidence.rows));
    }

    pub async fn prepare(&self, query: &str) -> Result<PrepareReport> {
        let state = self.sessions.validate_session().into_result()?;
        self.sessions.establish_new_baseline(query)?;
        let target = self.gateway.target_for(&state.connection).await?;
        let mut warnings = Vec::new();

        let inlining = match self.metadata.load_definitions(&target).await {
            Ok(catalog) => inline_dependencies(query, &catalog),
            Err(error) => {
                warn!(error = %format!("{error:#}"), "definition catalogs unavailable; query left as submitted");
                warnings.push(warning(
                    "inlining_unavailable",
                    format!("definitions could not be loaded: {error:#}"),
                ));
                InliningResult::unchanged(query)
            }
        };
        for ambiguous in &inlining.ambiguous {
            warnings.push(warning(
                "ambiguous_definition",
                format!(
                    "{} `{}` matches several definitions: {}",
                    ambiguous.kind,
                    ambiguous.reference,
                    ambiguous.candidates.join(", ")
                ),
            ));
        }
        info!(
            functions = inlining.functions.len(),
            measures = inlining.measures.len(),
            "dependencies inlined"
        );

        let enhanced = inlining.query.clone();
        self.sessions
            .update_query_data(|data| data.enhanced_query = Some(enhanced))?;

        let baseline = self.execute(&inlining.query, QueryMode::Baseline).await?;

        let metadata = match self.metadata.scoped_metadata(&target, &inlining.query).await {
            Ok(scoped) => serde_json::to_value(scoped)?,
            Err(error) => {
                warn!(error = %format!("{error:#}"), "model metadata unavailable");
                warnings.push(warning("metadata_unavailable", format!("{error:#}")));
                json!({"status": "error", "error": format!("{error:#}")})
            }
        };

        let guidance = self.gateway.fetch_guidance(&inlining.query).await.to_payload();

        Ok(PrepareReport {
            inlining,
            baseline,
            metadata,
            guidance,
            warnings,
        })
    }
}
