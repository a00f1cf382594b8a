use std::collections::BTreeMap;

use anyhow::{Result, bail};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::trace::{PerformanceSnapshot, ResultSet, TimedRun, parse_result_sets};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SemanticAnalysis {
    pub is_equivalent: bool,
    pub result_sets_compared: usize,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CumulativeImprovement {
    pub original_total_ms: f64,
    pub improvement_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BestSoFar {
    pub id: String,
    pub improvement_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PerformanceAnalysis {
    pub baseline_total_ms: f64,
    pub current_total_ms: f64,
    pub improvement_percent: f64,
    pub threshold_percent: f64,
    pub meets_threshold: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cumulative: Option<CumulativeImprovement>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_best: Option<BestSoFar>,

    pub is_new_best: bool,
}

/// `round(((baseline - current) / baseline) * 100, 2)`, or 0 for a non-positive baseline.
#[must_use]
pub fn improvement_percent(baseline_total: f64, current_total: f64) -> f64 {
    if baseline_total.is_nan() || baseline_total <= 0.0 {
        return 0.0;
    }
    round2((baseline_total - current_total) / baseline_total * 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[must_use]
pub fn analyze_performance(
    baseline: &PerformanceSnapshot,
    original_baseline: Option<&PerformanceSnapshot>,
    current: &PerformanceSnapshot,
    threshold_percent: f64,
    previous_best: Option<BestSoFar>,
) -> PerformanceAnalysis {
    let improvement = improvement_percent(baseline.total_ms, current.total_ms);
    let cumulative = original_baseline
        .filter(|original| *original != baseline)
        .map(|original| CumulativeImprovement {
            original_total_ms: original.total_ms,
            improvement_percent: improvement_percent(original.total_ms, current.total_ms),
        });
    let best_floor = previous_best
        .as_ref()
        .map_or(0.0, |best| best.improvement_percent);

    PerformanceAnalysis {
        baseline_total_ms: baseline.total_ms,
        current_total_ms: current.total_ms,
        improvement_percent: improvement,
        threshold_percent,
        meets_threshold: improvement >= threshold_percent,
        cumulative,
        previous_best,
        is_new_best: improvement > best_floor,
    }
}

#[must_use]
pub fn canonical_row(row: &Value) -> String {
    let Value::Object(object) = row else {
        return row.to_string();
    };

    let mut keys = object.keys().collect::<Vec<_>>();
    keys.sort();
    let pairs = keys
        .into_iter()
        .map(|key| format!("{key}:{}", object[key]))
        .collect::<Vec<_>>();
    format!("{{{}}}", pairs.join(","))
}

fn sorted_canonical_rows(set: &ResultSet) -> Vec<String> {
    let mut rows = set.rows.iter().map(canonical_row).collect::<Vec<_>>();
    rows.sort();
    rows
}

#[must_use]
pub fn semantic_equivalence(baseline: &Value, candidate: &Value) -> SemanticAnalysis {
    let baseline_sets = match parse_result_sets(baseline) {
        Ok(sets) => sets,
        Err(message) => return not_equivalent(format!("baseline results are malformed: {message}")),
    };
    let candidate_sets = match parse_result_sets(candidate) {
        Ok(sets) => sets,
        Err(message) => {
            return not_equivalent(format!("candidate results are malformed: {message}"));
        }
    };
    compare_result_sets(&baseline_sets, &candidate_sets)
}

#[must_use]
pub fn compare_result_sets(baseline: &[ResultSet], candidate: &[ResultSet]) -> SemanticAnalysis {
    if baseline.len() != candidate.len() {
        return not_equivalent(format!(
            "result set count differs (baseline {}, candidate {})",
            baseline.len(),
            candidate.len()
        ));
    }

    let candidate_by_number = candidate
        .iter()
        .map(|set| (set.result_number, set))
        .collect::<BTreeMap<_, _>>();
    let mut reasons = Vec::new();
    let mut compared = 0;

    for expected in baseline {
        let number = expected.result_number;
        let Some(actual) = candidate_by_number.get(&number) else {
            reasons.push(format!("result set {number}: missing from candidate"));
            continue;
        };
        compared += 1;

        if expected.row_count() != actual.row_count() {
            reasons.push(format!(
                "result set {number}: row count differs (baseline {}, candidate {})",
                expected.row_count(),
                actual.row_count()
            ));
            continue;
        }
        if expected.column_count() != actual.column_count() {
            reasons.push(format!(
                "result set {number}: column count differs (baseline {}, candidate {})",
                expected.column_count(),
                actual.column_count()
            ));
            continue;
        }

        let expected_rows = sorted_canonical_rows(expected);
        let actual_rows = sorted_canonical_rows(actual);
        if expected_rows != actual_rows {
            let differing = expected_rows
                .iter()
                .zip(&actual_rows)
                .filter(|(left, right)| left != right)
                .count();
            reasons.push(format!(
                "result set {number}: cell values differ ({differing} of {} sorted rows)",
                expected_rows.len()
            ));
        }
    }

    SemanticAnalysis {
        is_equivalent: reasons.is_empty(),
        result_sets_compared: compared,
        reasons,
    }
}

fn not_equivalent(reason: String) -> SemanticAnalysis {
    SemanticAnalysis {
        is_equivalent: false,
        result_sets_compared: 0,
        reasons: vec![reason],
    }
}

/// Smallest reported total wins, first-encountered on ties; the first run is
/// returned when no run reported a parseable total.
pub fn select_fastest_run(runs: &[TimedRun]) -> Result<&TimedRun> {
    let Some(first) = runs.first() else {
        bail!("no valid run to select from");
    };

    let mut fastest: Option<(&TimedRun, f64)> = None;
    for run in runs {
        let Some(total) = run.output.total_ms() else {
            continue;
        };
        match fastest {
            Some((_, best_total)) if total >= best_total => {}
            _ => fastest = Some((run, total)),
        }
    }

    Ok(fastest.map_or(first, |(run, _)| run))
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::{
        BestSoFar, analyze_performance, canonical_row, improvement_percent, select_fastest_run,
        semantic_equivalence,
    };
    use crate::models::trace::{PerformanceSnapshot, TimedRun, TraceOutput};

    fn snapshot(total_ms: f64) -> PerformanceSnapshot {
        PerformanceSnapshot {
            total_ms,
            fe_ms: 0.0,
            se_ms: 0.0,
            se_cpu_ms: 0.0,
            se_parallelism: 0.0,
            se_queries: 0,
            se_cache_hits: 0,
            query_end: None,
        }
    }

    fn run(run_number: usize, total: Option<f64>) -> TimedRun {
        let performance = match total {
            Some(total) => json!({"Total": total}),
            None => json!({}),
        };
        TimedRun {
            run_number,
            output: TraceOutput::parse(&json!({"Performance": performance}))
                .expect("trace should parse"),
        }
    }

    fn results(rows: Value) -> Value {
        json!([{"ResultNumber": 1, "Rows": rows}])
    }

    #[test]
    fn improvement_is_zero_for_non_positive_baseline() {
        assert_eq!(improvement_percent(0.0, 50.0), 0.0);
        assert_eq!(improvement_percent(-10.0, 50.0), 0.0);
    }

    #[test]
    fn improvement_rounds_to_two_places() {
        assert_eq!(improvement_percent(200.0, 150.0), 25.0);
        assert_eq!(improvement_percent(300.0, 200.0), 33.33);
        assert_eq!(improvement_percent(100.0, 125.0), -25.0);
    }

    #[test]
    fn canonical_row_ignores_key_order() {
        assert_eq!(
            canonical_row(&json!({"b": 1, "a": 2})),
            canonical_row(&json!({"a": 2, "b": 1}))
        );
        assert_eq!(canonical_row(&json!({"b": 1, "a": "x"})), r#"{a:"x",b:1}"#);
        assert_eq!(canonical_row(&json!(42)), "42");
    }

    #[test]
    fn equivalence_is_reflexive_under_row_permutation() {
        let baseline = results(json!([{"k": 1, "v": "a"}, {"k": 2, "v": "b"}]));
        let permuted = results(json!([{"v": "b", "k": 2}, {"v": "a", "k": 1}]));

        let same = semantic_equivalence(&baseline, &baseline.clone());
        assert!(same.is_equivalent);
        assert!(same.reasons.is_empty());

        let analysis = semantic_equivalence(&baseline, &permuted);
        assert!(analysis.is_equivalent, "reasons: {:?}", analysis.reasons);
        assert_eq!(analysis.result_sets_compared, 1);
    }

    #[test]
    fn equivalence_reports_shape_and_value_mismatches() {
        let baseline = results(json!([{"k": 1, "v": 10}, {"k": 2, "v": 20}]));

        let fewer_rows = semantic_equivalence(&baseline, &results(json!([{"k": 1, "v": 10}])));
        let extra_column = semantic_equivalence(
            &baseline,
            &results(json!([{"k": 1, "v": 10, "w": 0}, {"k": 2, "v": 20, "w": 0}])),
        );
        let changed_cell = semantic_equivalence(
            &baseline,
            &results(json!([{"k": 1, "v": 10}, {"k": 2, "v": 21}])),
        );

        for analysis in [&fewer_rows, &extra_column, &changed_cell] {
            assert!(!analysis.is_equivalent);
            assert_eq!(analysis.reasons.len(), 1);
            assert!(analysis.reasons[0].starts_with("result set 1:"));
        }
        assert!(fewer_rows.reasons[0].contains("row count"));
        assert!(extra_column.reasons[0].contains("column count"));
        assert!(changed_cell.reasons[0].contains("cell values"));
        assert_ne!(fewer_rows.reasons[0], extra_column.reasons[0]);
        assert_ne!(extra_column.reasons[0], changed_cell.reasons[0]);
    }

    #[test]
    fn equivalence_matches_result_sets_by_number() {
        let baseline = json!([
            {"ResultNumber": 1, "Rows": [{"a": 1}]},
            {"ResultNumber": 2, "Rows": [{"b": 2}]}
        ]);
        let reordered = json!([
            {"ResultNumber": 2, "Rows": [{"b": 2}]},
            {"ResultNumber": 1, "Rows": [{"a": 1}]}
        ]);
        assert!(semantic_equivalence(&baseline, &reordered).is_equivalent);

        let fewer = json!([{"ResultNumber": 1, "Rows": [{"a": 1}]}]);
        let analysis = semantic_equivalence(&baseline, &fewer);
        assert!(analysis.reasons[0].contains("result set count"));
    }

    #[test]
    fn malformed_results_are_not_equivalent() {
        let analysis = semantic_equivalence(&json!({"Rows": []}), &results(json!([])));
        assert!(!analysis.is_equivalent);
        assert!(analysis.reasons[0].contains("baseline results are malformed"));
    }

    #[test]
    fn fastest_run_picks_smallest_total() {
        let runs = vec![run(1, Some(120.0)), run(2, Some(80.0)), run(3, Some(200.0))];
        let fastest = select_fastest_run(&runs).expect("a run should be selected");
        assert_eq!(fastest.run_number, 2);
        assert_eq!(fastest.output.total_ms(), Some(80.0));
    }

    #[test]
    fn fastest_run_ties_keep_first_and_unparsed_fall_back_to_first() {
        let ties = vec![run(1, Some(90.0)), run(2, Some(90.0))];
        assert_eq!(select_fastest_run(&ties).expect("run").run_number, 1);

        let unparsed = vec![run(1, None), run(2, None)];
        assert_eq!(select_fastest_run(&unparsed).expect("run").run_number, 1);
    }

    #[test]
    fn fastest_run_of_empty_list_is_an_error() {
        let err = select_fastest_run(&[]).expect_err("empty input must fail");
        assert!(err.to_string().contains("no valid run"));
    }

    #[test]
    fn performance_analysis_adds_cumulative_only_after_rebaseline() {
        let baseline = snapshot(200.0);
        let current = snapshot(150.0);

        let first_cycle = analyze_performance(&baseline, Some(&baseline), &current, 10.0, None);
        assert_eq!(first_cycle.improvement_percent, 25.0);
        assert!(first_cycle.meets_threshold);
        assert!(first_cycle.cumulative.is_none());
        assert!(first_cycle.is_new_best);

        let original = snapshot(400.0);
        let rebaselined = analyze_performance(
            &baseline,
            Some(&original),
            &current,
            30.0,
            Some(BestSoFar {
                id: "optimization_1".to_string(),
                improvement_percent: 40.0,
            }),
        );
        assert!(!rebaselined.meets_threshold);
        assert!(!rebaselined.is_new_best);
        let cumulative = rebaselined.cumulative.expect("cumulative should be present");
        assert_eq!(cumulative.improvement_percent, 62.5);
    }
}
