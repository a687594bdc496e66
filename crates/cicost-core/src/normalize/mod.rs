pub mod canonical;
pub mod github;
pub mod gitlab;

use crate::cost;
use crate::error::NormalizationError;
use crate::rates::RateResolver;
use crate::run::{Conclusion, Run, RunStatus, RunnerClass};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{info, warn};

pub use canonical::CanonicalNormalizer;
pub use github::GitHubRunNormalizer;
pub use gitlab::GitLabPipelineNormalizer;

/// CI provider a raw payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    GitHub,
    GitLab,
    /// Payload already uses the canonical run field names.
    Canonical,
}

impl Provider {
    pub fn parse(value: &str) -> Result<Self, NormalizationError> {
        match value.trim().to_lowercase().as_str() {
            "github" | "gh" | "github-actions" => Ok(Provider::GitHub),
            "gitlab" | "gl" | "gitlab-ci" => Ok(Provider::GitLab),
            "canonical" => Ok(Provider::Canonical),
            other => Err(NormalizationError::UnsupportedProvider(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GitHub => "github",
            Provider::GitLab => "gitlab",
            Provider::Canonical => "canonical",
        }
    }
}

/// A provider-specific run payload as fetched by a collection adapter.
#[derive(Debug, Clone)]
pub struct RawRun {
    pub provider: Provider,
    /// Repository to use when the payload does not name one.
    pub repository_hint: Option<String>,
    pub payload: Value,
}

impl RawRun {
    pub fn new(provider: Provider, payload: Value) -> Self {
        Self {
            provider,
            repository_hint: None,
            payload,
        }
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository_hint = Some(repository.into());
        self
    }
}

/// A payload that failed normalization, kept alongside the successes.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedRun {
    /// Position in the input batch.
    pub index: usize,
    pub id: Option<String>,
    #[serde(serialize_with = "serialize_display")]
    pub error: NormalizationError,
}

/// Result of normalizing and costing a batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub runs: Vec<Run>,
    pub rejected: Vec<RejectedRun>,
}

/// Convert one raw payload into a canonical run.
pub fn normalize(raw: &RawRun) -> Result<Run, NormalizationError> {
    let hint = raw.repository_hint.as_deref();
    match raw.provider {
        Provider::GitHub => GitHubRunNormalizer::normalize(&raw.payload, hint),
        Provider::GitLab => GitLabPipelineNormalizer::normalize(&raw.payload, hint),
        Provider::Canonical => CanonicalNormalizer::normalize(&raw.payload, hint),
    }
}

/// Normalize and cost a batch. Failures are collected per run; the batch
/// never aborts.
///
/// Run ids are unique per (provider, repository). The first occurrence wins
/// and later copies, e.g. from overlapping exports, are rejected as
/// duplicates.
pub fn normalize_and_cost<R: RateResolver + ?Sized>(raw_runs: &[RawRun], rates: &R) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    let mut seen: HashSet<(String, String, String)> = HashSet::new();

    for (index, raw) in raw_runs.iter().enumerate() {
        let normalized = normalize(raw).and_then(|run| {
            let scope = (run.provider.clone(), run.repository.clone(), run.id.clone());
            if seen.insert(scope) {
                Ok(run)
            } else {
                Err(NormalizationError::DuplicateRun { id: run.id })
            }
        });

        match normalized {
            Ok(run) => outcome.runs.push(cost::cost_run(run, rates)),
            Err(error) => {
                let id = raw.payload.get("id").and_then(id_string);
                warn!(index, id = ?id, provider = raw.provider.as_str(), %error, "rejected run");
                outcome.rejected.push(RejectedRun { index, id, error });
            }
        }
    }

    info!(
        accepted = outcome.runs.len(),
        rejected = outcome.rejected.len(),
        "normalized run batch"
    );
    outcome
}

/// Intermediate field set shared by the provider adapters.
#[derive(Debug)]
pub(crate) struct RunFields {
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
}

impl RunFields {
    /// Enforce the completed-run invariants and build the canonical run.
    pub fn into_run(self) -> Result<Run, NormalizationError> {
        let mut run = Run::new(self.id, self.provider, self.repository, self.started_at);
        run.branch = self.branch;
        run.commit_sha = self.commit_sha;
        run.workflow_name = self.workflow_name;
        run.runner_class = self.runner_class;

        if self.status != RunStatus::Completed {
            run.status = self.status;
            return Ok(run);
        }

        let finished_at = self
            .finished_at
            .ok_or_else(|| NormalizationError::MissingFinishedAt { id: run.id.clone() })?;
        if finished_at < run.started_at {
            return Err(NormalizationError::NegativeDuration { id: run.id });
        }
        let conclusion = self
            .conclusion
            .ok_or(NormalizationError::MissingField { field: "conclusion" })?;

        Ok(run.completed(conclusion, finished_at))
    }
}

/// Ids may arrive as numbers or strings.
pub(crate) fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn required_id(payload: &Value) -> Result<String, NormalizationError> {
    payload
        .get("id")
        .and_then(id_string)
        .ok_or(NormalizationError::MissingField { field: "id" })
}

pub(crate) fn str_field<'a>(payload: &'a Value, pointer: &str) -> Option<&'a str> {
    payload
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Parse an optional RFC 3339 timestamp. Null or absent is `None`; anything
/// else that does not parse is an error.
pub(crate) fn timestamp_field(
    payload: &Value,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, NormalizationError> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| NormalizationError::InvalidTimestamp {
                field,
                value: s.clone(),
            }),
        Some(other) => Err(NormalizationError::InvalidTimestamp {
            field,
            value: other.to_string(),
        }),
    }
}

pub(crate) fn repository_or_hint(
    found: Option<&str>,
    hint: Option<&str>,
) -> Result<String, NormalizationError> {
    found
        .or(hint.filter(|h| !h.trim().is_empty()))
        .map(String::from)
        .ok_or(NormalizationError::MissingField { field: "repository" })
}

fn serialize_display<S: Serializer>(error: &NormalizationError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}
