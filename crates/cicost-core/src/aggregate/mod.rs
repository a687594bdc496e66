use crate::run::{Classification, Conclusion, Run};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A grouping dimension for aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Repository,
    Branch,
    Workflow,
    Classification,
    Conclusion,
}

impl Dimension {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "repository" | "repo" => Some(Dimension::Repository),
            "branch" => Some(Dimension::Branch),
            "workflow" => Some(Dimension::Workflow),
            "classification" | "class" => Some(Dimension::Classification),
            "conclusion" | "status" => Some(Dimension::Conclusion),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Repository => "repository",
            Dimension::Branch => "branch",
            Dimension::Workflow => "workflow",
            Dimension::Classification => "classification",
            Dimension::Conclusion => "conclusion",
        }
    }

    fn value_of(&self, run: &Run) -> String {
        match self {
            Dimension::Repository => run.repository.clone(),
            Dimension::Branch => run.branch.clone(),
            Dimension::Workflow => run.workflow_name.clone(),
            Dimension::Classification => run
                .classification
                .map(|c| c.as_str())
                .unwrap_or("unclassified")
                .to_string(),
            Dimension::Conclusion => run
                .conclusion
                .map(|c| c.as_str())
                .unwrap_or_else(|| run.status.as_str())
                .to_string(),
        }
    }
}

/// Time bucket granularity. Buckets are keyed on the run's start time, in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBucket {
    Day,
    /// ISO week, starting Monday.
    Week,
    Month,
}

impl TimeBucket {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "day" | "daily" => Some(TimeBucket::Day),
            "week" | "weekly" => Some(TimeBucket::Week),
            "month" | "monthly" => Some(TimeBucket::Month),
            _ => None,
        }
    }

    pub fn period_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = at.date_naive();
        let start = match self {
            TimeBucket::Day => date,
            TimeBucket::Week => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            TimeBucket::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date),
        };
        Utc.from_utc_datetime(&start.and_time(chrono::NaiveTime::MIN))
    }

    /// Start of the period after the one starting at `period_start`.
    pub fn next_period_start(&self, period_start: DateTime<Utc>) -> DateTime<Utc> {
        let step = match self {
            TimeBucket::Day => Duration::days(1),
            TimeBucket::Week => Duration::days(7),
            // Any month start plus 32 days lands in the following month.
            TimeBucket::Month => Duration::days(32),
        };
        self.period_start(period_start + step)
    }

    pub fn label(&self, at: DateTime<Utc>) -> String {
        match self {
            TimeBucket::Day => at.format("%Y-%m-%d").to_string(),
            TimeBucket::Week => {
                let week = at.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            TimeBucket::Month => at.format("%Y-%m").to_string(),
        }
    }
}

/// Ordered grouping dimensions plus an optional time bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupingSpec {
    pub dimensions: Vec<Dimension>,
    pub time_bucket: Option<TimeBucket>,
}

impl GroupingSpec {
    pub fn new(dimensions: Vec<Dimension>) -> Self {
        Self {
            dimensions,
            time_bucket: None,
        }
    }

    pub fn by(mut self, time_bucket: TimeBucket) -> Self {
        self.time_bucket = Some(time_bucket);
        self
    }
}

/// Half-open date range: `start` inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at < end)
    }
}

/// Which runs enter an aggregation. Unset fields do not filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunFilter {
    #[serde(default)]
    pub date_range: DateRange,
    pub repositories: Option<BTreeSet<String>>,
    pub branches: Option<BTreeSet<String>>,
    pub conclusions: Option<BTreeSet<Conclusion>>,
}

impl RunFilter {
    pub fn between(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self {
            date_range: DateRange::new(start, end),
            ..Self::default()
        }
    }

    pub fn matches(&self, run: &Run) -> bool {
        self.date_range.contains(run.started_at)
            && self
                .repositories
                .as_ref()
                .map_or(true, |repos| repos.contains(&run.repository))
            && self
                .branches
                .as_ref()
                .map_or(true, |branches| branches.contains(&run.branch))
            && self.conclusions.as_ref().map_or(true, |conclusions| {
                run.conclusion.map_or(false, |c| conclusions.contains(&c))
            })
    }
}

/// Totals for one distinct combination of grouping values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    /// Values of the grouping dimensions, in the order the grouping lists them.
    pub key: Vec<String>,
    /// Time bucket label (e.g. `2024-03-05`, `2024-W10`, `2024-03`).
    pub period: Option<String>,
    pub period_start: Option<DateTime<Utc>>,
    pub run_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_cost: f64,
    pub failed_cost: f64,
    pub redundant_cost: f64,
    pub total_duration_minutes: f64,
    pub avg_duration_minutes: f64,
}

impl AggregateBucket {
    /// A period in which the key had no runs.
    fn empty(key: Vec<String>, time_bucket: TimeBucket, period_start: DateTime<Utc>) -> Self {
        Self {
            key,
            period: Some(time_bucket.label(period_start)),
            period_start: Some(period_start),
            run_count: 0,
            success_count: 0,
            failure_count: 0,
            total_cost: 0.0,
            failed_cost: 0.0,
            redundant_cost: 0.0,
            total_duration_minutes: 0.0,
            avg_duration_minutes: 0.0,
        }
    }

    /// `key` values and period joined with `/`.
    pub fn label(&self) -> String {
        let mut parts = self.key.clone();
        if let Some(period) = &self.period {
            parts.push(period.clone());
        }
        if parts.is_empty() {
            "all".to_string()
        } else {
            parts.join("/")
        }
    }
}

/// Summary metrics over the whole filtered run set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Kpis {
    pub total_runs: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// In `[0, 1]`; 0 when there are no runs.
    pub success_rate: f64,
    pub total_cost: f64,
    pub failed_cost: f64,
    pub redundant_cost: f64,
    /// In `[0, 1]`; 0 when total cost is 0.
    pub redundant_cost_ratio: f64,
    pub avg_duration_minutes: f64,
}

/// A time-ordered run of buckets sharing one non-time key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketSeries {
    pub key: Vec<String>,
    pub buckets: Vec<AggregateBucket>,
}

impl BucketSeries {
    pub fn label(&self) -> String {
        if self.key.is_empty() {
            "all".to_string()
        } else {
            self.key.join("/")
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateResult {
    pub grouping: GroupingSpec,
    /// Sorted by key, then period.
    pub buckets: Vec<AggregateBucket>,
    pub kpis: Kpis,
}

impl AggregateResult {
    /// Split buckets into one series per non-time key, each ordered by period.
    ///
    /// With a time bucket, every series runs from its own first period up to
    /// the latest period of the whole result, one bucket per period. Periods
    /// without runs appear as zero-valued buckets, so all series end on the
    /// same most recent period.
    pub fn series(&self) -> Vec<BucketSeries> {
        let mut series: Vec<BucketSeries> = Vec::new();
        for bucket in &self.buckets {
            match series.last_mut() {
                Some(last) if last.key == bucket.key => last.buckets.push(bucket.clone()),
                _ => series.push(BucketSeries {
                    key: bucket.key.clone(),
                    buckets: vec![bucket.clone()],
                }),
            }
        }

        let Some(time_bucket) = self.grouping.time_bucket else {
            return series;
        };
        let Some(latest) = self.buckets.iter().filter_map(|b| b.period_start).max() else {
            return series;
        };
        for s in &mut series {
            let buckets = std::mem::take(&mut s.buckets);
            s.buckets = fill_gaps(&s.key, buckets, time_bucket, latest);
        }
        series
    }
}

fn fill_gaps(
    key: &[String],
    buckets: Vec<AggregateBucket>,
    time_bucket: TimeBucket,
    latest: DateTime<Utc>,
) -> Vec<AggregateBucket> {
    let mut existing = buckets.into_iter().peekable();
    let Some(mut cursor) = existing.peek().and_then(|b| b.period_start) else {
        return existing.collect();
    };

    let mut filled = Vec::new();
    while cursor <= latest {
        if existing.peek().is_some_and(|b| b.period_start == Some(cursor)) {
            filled.extend(existing.next());
        } else {
            filled.push(AggregateBucket::empty(key.to_vec(), time_bucket, cursor));
        }
        cursor = time_bucket.next_period_start(cursor);
    }
    filled.extend(existing);
    filled
}

#[derive(Default)]
struct Acc {
    run_count: usize,
    success_count: usize,
    failure_count: usize,
    total_cost: f64,
    failed_cost: f64,
    redundant_cost: f64,
    total_duration_minutes: f64,
    timed_runs: usize,
}

impl Acc {
    fn add(&mut self, run: &Run) {
        let cost = run.cost_amount();
        self.run_count += 1;
        self.total_cost += cost;
        if run.is_success() {
            self.success_count += 1;
        }
        if run.is_failure() {
            self.failure_count += 1;
        }
        match run.classification {
            Some(Classification::Failed) => self.failed_cost += cost,
            Some(Classification::Redundant) => self.redundant_cost += cost,
            _ => {}
        }
        if let Some(minutes) = run.duration_minutes {
            self.total_duration_minutes += minutes;
            self.timed_runs += 1;
        }
    }

    fn avg_duration(&self) -> f64 {
        ratio(self.total_duration_minutes, self.timed_runs as f64)
    }
}

/// Group costed, classified runs and compute per-bucket totals and KPIs.
///
/// Runs are summed in a canonical order, so the result does not depend on
/// the order of `runs`.
pub fn aggregate(runs: &[Run], grouping: &GroupingSpec, filter: &RunFilter) -> AggregateResult {
    let mut selected: Vec<&Run> = runs.iter().filter(|run| filter.matches(run)).collect();
    selected.sort_by(|a, b| {
        (&a.provider, &a.repository, a.started_at, &a.id)
            .cmp(&(&b.provider, &b.repository, b.started_at, &b.id))
            .then(a.cost_amount().total_cmp(&b.cost_amount()))
            .then(duration_key(a).total_cmp(&duration_key(b)))
    });

    let mut totals = Acc::default();
    let mut groups: BTreeMap<(Vec<String>, Option<DateTime<Utc>>), (Option<String>, Acc)> =
        BTreeMap::new();

    for run in &selected {
        totals.add(run);

        let key: Vec<String> = grouping.dimensions.iter().map(|d| d.value_of(run)).collect();
        let period = grouping
            .time_bucket
            .map(|tb| (tb.period_start(run.started_at), tb.label(run.started_at)));
        let period_start = period.as_ref().map(|(start, _)| *start);

        groups
            .entry((key, period_start))
            .or_insert_with(|| (period.map(|(_, label)| label), Acc::default()))
            .1
            .add(run);
    }

    let buckets = groups
        .into_iter()
        .map(|((key, period_start), (period, acc))| AggregateBucket {
            key,
            period,
            period_start,
            run_count: acc.run_count,
            success_count: acc.success_count,
            failure_count: acc.failure_count,
            total_cost: acc.total_cost,
            failed_cost: acc.failed_cost,
            redundant_cost: acc.redundant_cost,
            total_duration_minutes: acc.total_duration_minutes,
            avg_duration_minutes: acc.avg_duration(),
        })
        .collect();

    let kpis = Kpis {
        total_runs: totals.run_count,
        success_count: totals.success_count,
        failure_count: totals.failure_count,
        success_rate: ratio(totals.success_count as f64, totals.run_count as f64),
        total_cost: totals.total_cost,
        failed_cost: totals.failed_cost,
        redundant_cost: totals.redundant_cost,
        redundant_cost_ratio: ratio(totals.redundant_cost, totals.total_cost).min(1.0),
        avg_duration_minutes: totals.avg_duration(),
    };

    AggregateResult {
        grouping: grouping.clone(),
        buckets,
        kpis,
    }
}

fn duration_key(run: &Run) -> f64 {
    run.duration_minutes.unwrap_or(-1.0)
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}
