use super::{repository_or_hint, required_id, str_field, timestamp_field, RunFields};
use crate::error::NormalizationError;
use crate::run::{Conclusion, Run, RunStatus, RunnerClass};
use serde_json::Value;

/// Normalizer for GitHub Actions workflow-run payloads
/// (`GET /repos/{owner}/{repo}/actions/runs`).
pub struct GitHubRunNormalizer;

impl GitHubRunNormalizer {
    pub fn normalize(payload: &Value, repository_hint: Option<&str>) -> Result<Run, NormalizationError> {
        let id = required_id(payload)?;
        let repository = repository_or_hint(
            str_field(payload, "/repository/full_name"),
            repository_hint,
        )?;

        // Re-runs keep created_at from the first attempt; run_started_at is
        // the start of the current attempt.
        let started_at = match timestamp_field(payload, "run_started_at")? {
            Some(ts) => ts,
            None => timestamp_field(payload, "created_at")?
                .ok_or(NormalizationError::MissingField { field: "started_at" })?,
        };
        let finished_at = match timestamp_field(payload, "completed_at")? {
            Some(ts) => Some(ts),
            None => timestamp_field(payload, "updated_at")?,
        };

        let status_value = str_field(payload, "/status")
            .ok_or(NormalizationError::MissingField { field: "status" })?;
        let status = parse_status(status_value)?;

        let conclusion = match str_field(payload, "/conclusion") {
            Some(value) => Some(parse_conclusion(value)?),
            None => None,
        };

        RunFields {
            id,
            provider: "github".to_string(),
            repository,
            branch: str_field(payload, "/head_branch").unwrap_or_default().to_string(),
            commit_sha: str_field(payload, "/head_sha").unwrap_or_default().to_string(),
            workflow_name: str_field(payload, "/name")
                .or_else(|| str_field(payload, "/display_title"))
                .unwrap_or_default()
                .to_string(),
            runner_class: detect_runner_class(payload),
            status,
            conclusion,
            started_at,
            finished_at,
        }
        .into_run()
    }
}

fn parse_status(value: &str) -> Result<RunStatus, NormalizationError> {
    match value {
        "queued" | "requested" | "waiting" | "pending" => Ok(RunStatus::Queued),
        "in_progress" => Ok(RunStatus::InProgress),
        "completed" => Ok(RunStatus::Completed),
        other => Err(NormalizationError::InvalidValue {
            field: "status",
            value: other.to_string(),
        }),
    }
}

fn parse_conclusion(value: &str) -> Result<Conclusion, NormalizationError> {
    match value {
        "success" => Ok(Conclusion::Success),
        "failure" | "timed_out" | "startup_failure" => Ok(Conclusion::Failure),
        "cancelled" | "stale" => Ok(Conclusion::Cancelled),
        "skipped" | "neutral" | "action_required" => Ok(Conclusion::Skipped),
        other => Err(NormalizationError::InvalidValue {
            field: "conclusion",
            value: other.to_string(),
        }),
    }
}

/// Workflow-run payloads carry no runner information; collectors that join
/// job data in may add `runner_class` or the job's `labels`.
fn detect_runner_class(payload: &Value) -> RunnerClass {
    if let Some(class) = str_field(payload, "/runner_class").and_then(RunnerClass::parse) {
        return class;
    }

    match payload.get("labels").and_then(Value::as_array) {
        Some(labels) if labels.iter().any(|l| l.as_str() == Some("self-hosted")) => {
            RunnerClass::SelfHosted
        }
        Some(labels) if !labels.is_empty() => RunnerClass::Hosted,
        _ => RunnerClass::Unknown,
    }
}
