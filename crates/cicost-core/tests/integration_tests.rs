use chrono::{Duration, TimeZone, Utc};
use cicost_core::aggregate::{self, Dimension, GroupingSpec, RunFilter, TimeBucket};
use cicost_core::anomaly::{self, AnomalyConfig, AnomalyStatus};
use cicost_core::classify;
use cicost_core::config::EngineConfig;
use cicost_core::error::NormalizationError;
use cicost_core::normalize::{self, Provider, RawRun};
use cicost_core::rates::RateTable;
use cicost_core::report;
use cicost_core::run::{Classification, RunStatus, RunnerClass};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// Get the workspace root (two levels up from CARGO_MANIFEST_DIR of cicost-core).
fn fixtures_dir() -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    Path::new(manifest_dir)
        .parent()
        .unwrap() // crates/
        .parent()
        .unwrap() // workspace root
        .join("tests/fixtures")
}

fn load_fixture(provider: Provider, relative: &str) -> Vec<RawRun> {
    let content = std::fs::read_to_string(fixtures_dir().join(relative)).unwrap();
    let doc: Value = serde_json::from_str(&content).unwrap();
    let items = match doc {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("workflow_runs") {
            Some(Value::Array(items)) => items,
            _ => panic!("fixture {relative} has no workflow_runs"),
        },
        _ => panic!("fixture {relative} is not a run listing"),
    };
    items.into_iter().map(|p| RawRun::new(provider, p)).collect()
}

fn github_rates() -> RateTable {
    RateTable::new(0.01)
        .unwrap()
        .with_entry("github", RunnerClass::SelfHosted, 0.002)
        .unwrap()
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

fn canonical(id: &str, branch: &str, sha: &str, offset_min: i64, minutes: i64, conclusion: &str) -> RawRun {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(offset_min);
    RawRun::new(
        Provider::Canonical,
        json!({
            "id": id,
            "provider": "gh",
            "repository": "acme/api",
            "branch": branch,
            "commit_sha": sha,
            "runner_class": "hosted",
            "status": "completed",
            "conclusion": conclusion,
            "started_at": start.to_rfc3339(),
            "finished_at": (start + Duration::minutes(minutes)).to_rfc3339(),
        }),
    )
}

// ─── GitHub Actions fixture ───

#[test]
fn test_github_export_normalizes_and_reports_rejects() {
    let raw = load_fixture(Provider::GitHub, "github/workflow_runs.json");
    let outcome = normalize::normalize_and_cost(&raw, &github_rates());

    assert_eq!(outcome.runs.len(), 6);
    assert_eq!(outcome.rejected.len(), 2);
    assert_eq!(outcome.rejected[0].id.as_deref(), Some("107"));
    assert_eq!(
        outcome.rejected[0].error,
        NormalizationError::MissingField { field: "started_at" }
    );
    assert_eq!(outcome.rejected[1].id.as_deref(), Some("108"));
    assert!(matches!(
        outcome.rejected[1].error,
        NormalizationError::MissingFinishedAt { .. }
    ));
}

#[test]
fn test_github_export_costs_and_classifies() {
    let raw = load_fixture(Provider::GitHub, "github/workflow_runs.json");
    let outcome = normalize::normalize_and_cost(&raw, &github_rates());
    let runs = classify::classify(outcome.runs);

    let by_id = |id: &str| runs.iter().find(|r| r.id == id).unwrap();

    assert_close(by_id("101").cost_amount(), 0.12);
    assert_close(by_id("104").cost_amount(), 0.016);
    assert!(by_id("104").cost.unwrap().rate_matched);
    assert!(!by_id("101").cost.unwrap().rate_matched);
    assert_eq!(by_id("105").status, RunStatus::InProgress);
    assert_eq!(by_id("105").cost_amount(), 0.0);

    assert_eq!(by_id("101").classification, Some(Classification::Productive));
    assert_eq!(by_id("102").classification, Some(Classification::Failed));
    assert_eq!(by_id("103").classification, Some(Classification::Redundant));
    assert_eq!(by_id("104").classification, Some(Classification::Productive));
    assert_eq!(by_id("106").classification, Some(Classification::Productive));

    let result = aggregate::aggregate(
        &runs,
        &GroupingSpec::new(vec![Dimension::Branch]),
        &RunFilter::default(),
    );
    assert_eq!(result.kpis.total_runs, 6);
    assert_eq!(result.kpis.success_rate, 0.5);
    assert_close(result.kpis.failed_cost, 0.06);
    assert_close(result.kpis.redundant_cost, 0.08);
    assert_eq!(result.buckets.len(), 2);
    assert_eq!(result.buckets[0].key, vec!["feat/x".to_string()]);
}

#[test]
fn test_costing_properties_hold_for_every_run() {
    let raw = load_fixture(Provider::GitHub, "github/workflow_runs.json");
    let rates = github_rates();
    let runs = classify::classify(normalize::normalize_and_cost(&raw, &rates).runs);

    for run in &runs {
        let cost = run.cost.unwrap();
        assert!(cost.rate_per_minute > 0.0);
        assert!(cost.amount >= 0.0);
        match run.duration_minutes {
            Some(minutes) if run.status == RunStatus::Completed => {
                assert_close(cost.amount, minutes * cost.rate_per_minute)
            }
            _ => assert_eq!(cost.amount, 0.0),
        }
        assert!(run.classification.is_some());
        if run.is_failure() {
            assert_eq!(run.classification, Some(Classification::Failed));
        }
    }
}

#[test]
fn test_overlapping_exports_are_counted_once() {
    let mut raw = load_fixture(Provider::GitHub, "github/workflow_runs.json");
    raw.extend(load_fixture(Provider::GitHub, "github/workflow_runs.json"));
    let outcome = normalize::normalize_and_cost(&raw, &github_rates());

    assert_eq!(outcome.runs.len(), 6);
    let duplicates = outcome
        .rejected
        .iter()
        .filter(|r| matches!(r.error, NormalizationError::DuplicateRun { .. }))
        .count();
    assert_eq!(duplicates, 6);
    assert_eq!(outcome.rejected.len(), 10);

    let runs = classify::classify(outcome.runs);
    let result = aggregate::aggregate(&runs, &GroupingSpec::default(), &RunFilter::default());
    assert_eq!(result.kpis.total_runs, 6);
    assert_close(result.kpis.failed_cost, 0.06);
    assert_close(result.kpis.redundant_cost, 0.08);
}

// ─── GitLab CI fixture ───

#[test]
fn test_gitlab_pipelines() {
    let raw: Vec<RawRun> = load_fixture(Provider::GitLab, "gitlab/pipelines.json");
    let rates = RateTable::new(0.05)
        .unwrap()
        .with_entry("gitlab", RunnerClass::Hosted, 0.01)
        .unwrap();
    let runs = classify::classify(normalize::normalize_and_cost(&raw, &rates).runs);

    assert_eq!(runs.len(), 3);
    assert_close(runs[0].cost_amount(), 20.0 * 0.01);
    assert_close(runs[1].cost_amount(), 10.0 * 0.05);
    assert_eq!(runs[1].runner_class, RunnerClass::SelfHosted);
    assert_eq!(runs[1].classification, Some(Classification::Failed));
    assert_eq!(runs[2].cost_amount(), 0.0);
    assert_eq!(runs[2].classification, Some(Classification::Productive));
}

// ─── Reference scenarios ───

#[test]
fn test_success_and_failure_scenario() {
    let raw = vec![
        canonical("a", "main", "s1", 0, 10, "success"),
        canonical("b", "feat", "s2", 30, 5, "failure"),
    ];
    let rates = RateTable::new(2.0).unwrap();
    let runs = classify::classify(normalize::normalize_and_cost(&raw, &rates).runs);

    let costs: Vec<f64> = runs.iter().map(|r| r.cost_amount()).collect();
    assert_eq!(costs, vec![20.0, 10.0]);
    assert_eq!(
        runs.iter().map(|r| r.classification.unwrap()).collect::<Vec<_>>(),
        vec![Classification::Productive, Classification::Failed]
    );

    let result = aggregate::aggregate(&runs, &GroupingSpec::default(), &RunFilter::default());
    assert_eq!(result.kpis.total_cost, 30.0);
    assert_eq!(result.kpis.failed_cost, 10.0);
    assert_eq!(result.kpis.success_rate, 0.5);
    assert_eq!(result.kpis.redundant_cost_ratio, 0.0);
}

#[test]
fn test_superseded_success_scenario() {
    let raw = vec![
        canonical("first", "feat", "same", 0, 4, "success"),
        canonical("second", "feat", "same", 20, 4, "success"),
    ];
    let runs = classify::classify(
        normalize::normalize_and_cost(&raw, &RateTable::default()).runs,
    );
    assert_eq!(runs[0].classification, Some(Classification::Redundant));
    assert_eq!(runs[1].classification, Some(Classification::Productive));
}

#[test]
fn test_flat_baseline_scenario() {
    let config = AnomalyConfig::default();
    let baseline = [10.0, 10.0, 10.0, 10.0];

    let same = anomaly::detect_value_anomaly(&baseline, 10.0, &config).unwrap();
    assert_eq!(same.status, AnomalyStatus::Normal);

    let spike = anomaly::detect_value_anomaly(&baseline, 15.0, &config).unwrap();
    assert_eq!(spike.status, AnomalyStatus::Anomalous);
    assert_eq!(spike.deviation, Some(5.0));
}

#[test]
fn test_aggregation_ignores_input_order() {
    let raw = load_fixture(Provider::GitHub, "github/workflow_runs.json");
    let runs = classify::classify(normalize::normalize_and_cost(&raw, &github_rates()).runs);
    let spec = GroupingSpec::new(vec![Dimension::Repository, Dimension::Classification])
        .by(TimeBucket::Day);

    let baseline = aggregate::aggregate(&runs, &spec, &RunFilter::default());
    for shift in 1..runs.len() {
        let mut rotated = runs.clone();
        rotated.rotate_left(shift);
        let mut reversed = rotated.clone();
        reversed.reverse();

        for shuffled in [rotated, reversed] {
            let result = aggregate::aggregate(&shuffled, &spec, &RunFilter::default());
            assert_eq!(result.buckets, baseline.buckets);
            assert_eq!(result.kpis, baseline.kpis);
        }
    }
}

#[test]
fn test_classification_ignores_input_order() {
    let raw = load_fixture(Provider::GitHub, "github/workflow_runs.json");
    let runs = normalize::normalize_and_cost(&raw, &github_rates()).runs;

    let mut forward = classify::classify(runs.clone());
    let mut reversed_input = runs;
    reversed_input.reverse();
    let mut reversed = classify::classify(reversed_input);

    forward.sort_by(|a, b| a.id.cmp(&b.id));
    reversed.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(forward, reversed);
}

// ─── Full pipeline ───

#[test]
fn test_analyze_batch_with_daily_series() {
    let mut raw: Vec<RawRun> = (0..6)
        .map(|day| canonical(&format!("r{day}"), "main", &format!("c{day}"), day * 24 * 60, 10, "success"))
        .collect();
    raw.push(canonical("r6", "main", "c6", 6 * 24 * 60, 10, "success"));

    let config = EngineConfig::from_toml_str(
        r#"
[rates]
default_per_minute = 1.0

[anomaly]
baseline_window = 5
min_baseline_periods = 3
"#,
    )
    .unwrap();
    let grouping = GroupingSpec::new(vec![Dimension::Repository]).by(TimeBucket::Day);
    let as_of = Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap();

    let report =
        report::analyze_batch(&raw, &config, &grouping, &RunFilter::default(), as_of).unwrap();

    assert_eq!(report.buckets.len(), 7);
    assert_eq!(report.anomalies.len(), 1);
    assert_eq!(report.anomalies[0].result.baseline_periods, 5);
    assert_eq!(report.anomalies[0].result.status, AnomalyStatus::Normal);
    assert_eq!(report.savings.projected_savings, 0.0);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["savings"]["kind"], "estimate");
    assert_eq!(json["kpis"]["total_runs"], 7);
}
