use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
}

impl Conclusion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Conclusion::Success => "success",
            Conclusion::Failure => "failure",
            Conclusion::Cancelled => "cancelled",
            Conclusion::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "success" => Some(Conclusion::Success),
            "failure" | "failed" => Some(Conclusion::Failure),
            "cancelled" | "canceled" => Some(Conclusion::Cancelled),
            "skipped" => Some(Conclusion::Skipped),
            _ => None,
        }
    }
}

/// Compute class a run executed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunnerClass {
    Hosted,
    SelfHosted,
    Unknown,
}

impl RunnerClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerClass::Hosted => "hosted",
            RunnerClass::SelfHosted => "self-hosted",
            RunnerClass::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace('_', "-").as_str() {
            "hosted" | "github-hosted" | "shared" => Some(RunnerClass::Hosted),
            "self-hosted" | "selfhosted" => Some(RunnerClass::SelfHosted),
            "unknown" => Some(RunnerClass::Unknown),
            _ => None,
        }
    }
}

/// Waste label assigned by the redundancy classifier. Exactly one per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Productive,
    Failed,
    Redundant,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Productive => "productive",
            Classification::Failed => "failed",
            Classification::Redundant => "redundant",
        }
    }
}

/// Monetary cost attached to a run by the cost calculator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunCost {
    pub amount: f64,
    pub rate_per_minute: f64,
    /// False when no (provider, runner class) entry matched and the default rate was used.
    pub rate_matched: bool,
}

/// Canonical workflow run, independent of the CI provider it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub provider: String,
    pub repository: String,
    pub branch: String,
    pub commit_sha: String,
    pub workflow_name: String,
    pub runner_class: RunnerClass,
    pub status: RunStatus,
    pub conclusion: Option<Conclusion>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<f64>,
    pub cost: Option<RunCost>,
    pub classification: Option<Classification>,
}

impl Run {
    /// A queued run with empty provenance, to be filled in by the caller.
    pub fn new(id: String, provider: String, repository: String, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            provider,
            repository,
            branch: String::new(),
            commit_sha: String::new(),
            workflow_name: String::new(),
            runner_class: RunnerClass::Unknown,
            status: RunStatus::Queued,
            conclusion: None,
            started_at,
            finished_at: None,
            duration_minutes: None,
            cost: None,
            classification: None,
        }
    }

    /// Mark the run completed. Duration is derived from the timestamps and
    /// never negative.
    pub fn completed(mut self, conclusion: Conclusion, finished_at: DateTime<Utc>) -> Self {
        let secs = (finished_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        self.status = RunStatus::Completed;
        self.conclusion = Some(conclusion);
        self.finished_at = Some(finished_at);
        self.duration_minutes = Some((secs / 60.0).max(0.0));
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn is_success(&self) -> bool {
        self.conclusion == Some(Conclusion::Success)
    }

    pub fn is_failure(&self) -> bool {
        self.conclusion == Some(Conclusion::Failure)
    }

    /// Cost amount, or 0 when the run has not been costed.
    pub fn cost_amount(&self) -> f64 {
        self.cost.map(|c| c.amount).unwrap_or(0.0)
    }
}
