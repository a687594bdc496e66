use crate::aggregate::{self, AggregateBucket, GroupingSpec, Kpis, RunFilter};
use crate::anomaly::{self, AnomalyResult, SavingsProjection};
use crate::classify::{self, ClassificationPolicy};
use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::normalize::{self, RawRun, RejectedRun};
use crate::run::Run;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Anomaly verdict for one grouping key.
#[derive(Debug, Clone, Serialize)]
pub struct KeyedAnomaly {
    pub key: Vec<String>,
    pub result: AnomalyResult,
}

/// A grouping key whose series was too short for anomaly detection.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedAnomalyKey {
    pub key: Vec<String>,
    pub reason: String,
}

/// Everything the engine derives from one batch, as plain data.
#[derive(Debug, Clone, Serialize)]
pub struct InsightReport {
    pub generated_at: DateTime<Utc>,
    pub runs: Vec<Run>,
    pub rejected: Vec<RejectedRun>,
    pub grouping: GroupingSpec,
    pub buckets: Vec<AggregateBucket>,
    pub kpis: Kpis,
    pub anomalies: Vec<KeyedAnomaly>,
    pub skipped_anomaly_keys: Vec<SkippedAnomalyKey>,
    pub savings: SavingsProjection,
}

impl InsightReport {
    /// Most recently started runs that passed the filter, newest first.
    pub fn recent_runs(&self, limit: usize) -> Vec<&Run> {
        let mut runs: Vec<&Run> = self.runs.iter().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        runs.truncate(limit);
        runs
    }

    pub fn anomalous(&self) -> impl Iterator<Item = &KeyedAnomaly> {
        self.anomalies.iter().filter(|a| a.result.is_anomalous())
    }
}

/// Run the full pipeline over one batch: normalize, cost, classify,
/// aggregate, then anomaly detection per series and a savings estimate.
///
/// Classification sees the whole batch; `filter` only narrows what is
/// aggregated and reported. Anomaly detection runs only when `grouping`
/// has a time bucket.
pub fn analyze_batch(
    raw_runs: &[RawRun],
    config: &EngineConfig,
    grouping: &GroupingSpec,
    filter: &RunFilter,
    as_of: DateTime<Utc>,
) -> Result<InsightReport, ConfigError> {
    let rates = config.validate()?;
    let outcome = normalize::normalize_and_cost(raw_runs, &rates);

    let policy = ClassificationPolicy::from_config(&config.classification, as_of);
    let classified = classify::classify_with(outcome.runs, &policy);
    let aggregated = aggregate::aggregate(&classified, grouping, filter);

    let mut anomalies = Vec::new();
    let mut skipped_anomaly_keys = Vec::new();
    if grouping.time_bucket.is_some() {
        for series in aggregated.series() {
            match anomaly::detect_anomalies(&series.buckets, &config.anomaly) {
                Ok(result) => anomalies.push(KeyedAnomaly {
                    key: series.key,
                    result,
                }),
                Err(err) => {
                    warn!(key = %series.label(), %err, "skipping anomaly detection");
                    skipped_anomaly_keys.push(SkippedAnomalyKey {
                        key: series.key,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    let savings =
        anomaly::project_savings_from_kpis(&aggregated.kpis, config.savings.target_reduction);
    let runs: Vec<Run> = classified.into_iter().filter(|r| filter.matches(r)).collect();

    info!(
        runs = runs.len(),
        rejected = outcome.rejected.len(),
        buckets = aggregated.buckets.len(),
        anomalies = anomalies.iter().filter(|a| a.result.is_anomalous()).count(),
        "analyzed batch"
    );

    Ok(InsightReport {
        generated_at: as_of,
        runs,
        rejected: outcome.rejected,
        grouping: aggregated.grouping,
        buckets: aggregated.buckets,
        kpis: aggregated.kpis,
        anomalies,
        skipped_anomaly_keys,
        savings,
    })
}
