use crate::aggregate::{AggregateBucket, Kpis};
use crate::error::InsufficientDataError;
use serde::{Deserialize, Serialize};

/// Bucket metric the detector watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMetric {
    #[default]
    TotalCost,
    FailedCost,
    AvgDurationMinutes,
}

impl AnomalyMetric {
    pub fn value(&self, bucket: &AggregateBucket) -> f64 {
        match self {
            AnomalyMetric::TotalCost => bucket.total_cost,
            AnomalyMetric::FailedCost => bucket.failed_cost,
            AnomalyMetric::AvgDurationMinutes => bucket.avg_duration_minutes,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyMetric::TotalCost => "total_cost",
            AnomalyMetric::FailedCost => "failed_cost",
            AnomalyMetric::AvgDurationMinutes => "avg_duration_minutes",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Trailing periods used as the baseline, excluding the latest one.
    #[serde(default = "default_baseline_window")]
    pub baseline_window: usize,

    /// Standard deviations above the mean that count as anomalous (k).
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,

    #[serde(default = "default_min_baseline_periods")]
    pub min_baseline_periods: usize,

    #[serde(default)]
    pub metric: AnomalyMetric,
}

fn default_baseline_window() -> usize {
    14
}

fn default_sensitivity() -> f64 {
    2.0
}

fn default_min_baseline_periods() -> usize {
    3
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            baseline_window: default_baseline_window(),
            sensitivity: default_sensitivity(),
            min_baseline_periods: default_min_baseline_periods(),
            metric: AnomalyMetric::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyStatus {
    Normal,
    Anomalous,
}

/// Verdict for the most recent period of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub status: AnomalyStatus,
    pub metric: AnomalyMetric,
    pub period: Option<String>,
    pub observed: f64,
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
    pub baseline_periods: usize,
    /// `mean + k * stddev`; equal to the mean for a flat baseline.
    pub threshold: f64,
    /// Signed `observed - mean`, set only when anomalous.
    pub deviation: Option<f64>,
    /// Deviation in standard deviations; `None` for a flat baseline.
    pub z_score: Option<f64>,
}

impl AnomalyResult {
    pub fn is_anomalous(&self) -> bool {
        self.status == AnomalyStatus::Anomalous
    }
}

/// Check the last bucket of a time-ordered series against the trailing
/// baseline that precedes it.
pub fn detect_anomalies(
    series: &[AggregateBucket],
    config: &AnomalyConfig,
) -> Result<AnomalyResult, InsufficientDataError> {
    let Some((latest, history)) = series.split_last() else {
        return Err(InsufficientDataError {
            required: config.min_baseline_periods,
            available: 0,
        });
    };

    let start = history.len().saturating_sub(config.baseline_window);
    let baseline: Vec<f64> = history[start..]
        .iter()
        .map(|bucket| config.metric.value(bucket))
        .collect();

    let mut result = detect_value_anomaly(&baseline, config.metric.value(latest), config)?;
    result.metric = config.metric;
    result.period = latest.period.clone();
    Ok(result)
}

/// Core test over plain values: `baseline` in time order, `observed` the
/// most recent value.
pub fn detect_value_anomaly(
    baseline: &[f64],
    observed: f64,
    config: &AnomalyConfig,
) -> Result<AnomalyResult, InsufficientDataError> {
    let required = config.min_baseline_periods.max(1);
    if baseline.len() < required {
        return Err(InsufficientDataError {
            required,
            available: baseline.len(),
        });
    }

    let n = baseline.len() as f64;
    let mean = baseline.iter().sum::<f64>() / n;
    let variance = baseline.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    // A flat baseline has no band; any change at all is the signal.
    let flat = baseline.iter().all(|v| *v == baseline[0]);
    let (anomalous, mean, stddev, threshold, z_score) = if flat || stddev == 0.0 {
        let value = baseline[0];
        (observed != value, value, 0.0, value, None)
    } else {
        let threshold = mean + config.sensitivity * stddev;
        (
            observed > threshold,
            mean,
            stddev,
            threshold,
            Some((observed - mean) / stddev),
        )
    };

    Ok(AnomalyResult {
        status: if anomalous {
            AnomalyStatus::Anomalous
        } else {
            AnomalyStatus::Normal
        },
        metric: config.metric,
        period: None,
        observed,
        baseline_mean: mean,
        baseline_stddev: stddev,
        baseline_periods: baseline.len(),
        threshold,
        deviation: anomalous.then_some(observed - mean),
        z_score,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavingsConfig {
    /// Fraction of failed + redundant spend assumed avoidable, in `[0, 1]`.
    #[serde(default = "default_target_reduction")]
    pub target_reduction: f64,
}

fn default_target_reduction() -> f64 {
    0.5
}

impl Default for SavingsConfig {
    fn default() -> Self {
        Self {
            target_reduction: default_target_reduction(),
        }
    }
}

/// Marks a figure as a projection rather than measured spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FigureKind {
    Estimate,
}

/// Projected savings if failure and redundancy waste shrank by a fraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsProjection {
    pub kind: FigureKind,
    pub failed_cost: f64,
    pub redundant_cost: f64,
    pub target_reduction_fraction: f64,
    pub projected_savings: f64,
    pub note: String,
}

/// `(failed_cost + redundant_cost) * fraction`, with the fraction clamped
/// to `[0, 1]`.
pub fn project_savings(failed_cost: f64, redundant_cost: f64, target_reduction: f64) -> SavingsProjection {
    let fraction = if target_reduction.is_nan() {
        0.0
    } else {
        target_reduction.clamp(0.0, 1.0)
    };

    SavingsProjection {
        kind: FigureKind::Estimate,
        failed_cost,
        redundant_cost,
        target_reduction_fraction: fraction,
        projected_savings: (failed_cost + redundant_cost) * fraction,
        note: "estimate only; assumes failed and redundant spend shrinks by the target fraction"
            .to_string(),
    }
}

pub fn project_savings_from_kpis(kpis: &Kpis, target_reduction: f64) -> SavingsProjection {
    project_savings(kpis.failed_cost, kpis.redundant_cost, target_reduction)
}
