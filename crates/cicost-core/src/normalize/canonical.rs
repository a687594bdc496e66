use super::{repository_or_hint, required_id, str_field, timestamp_field, RunFields};
use crate::error::NormalizationError;
use crate::run::{Conclusion, Run, RunStatus, RunnerClass};
use serde_json::Value;

/// Normalizer for payloads that already use the canonical field names
/// (`id`, `provider`, `repository`, `branch`, `commit_sha`, `workflow_name`,
/// `runner_class`, `status`, `conclusion`, `started_at`, `finished_at`).
pub struct CanonicalNormalizer;

impl CanonicalNormalizer {
    pub fn normalize(payload: &Value, repository_hint: Option<&str>) -> Result<Run, NormalizationError> {
        let id = required_id(payload)?;
        let repository = repository_or_hint(str_field(payload, "/repository"), repository_hint)?;
        let started_at = timestamp_field(payload, "started_at")?
            .ok_or(NormalizationError::MissingField { field: "started_at" })?;
        let finished_at = timestamp_field(payload, "finished_at")?;

        let status = match str_field(payload, "/status") {
            None => {
                if finished_at.is_some() {
                    RunStatus::Completed
                } else {
                    RunStatus::Queued
                }
            }
            Some(value) => parse_status(value)?,
        };

        let conclusion = match str_field(payload, "/conclusion") {
            None => None,
            Some(value) => Some(Conclusion::parse(value).ok_or_else(|| {
                NormalizationError::InvalidValue {
                    field: "conclusion",
                    value: value.to_string(),
                }
            })?),
        };

        let runner_class = match str_field(payload, "/runner_class") {
            None => RunnerClass::Unknown,
            Some(value) => {
                RunnerClass::parse(value).ok_or_else(|| NormalizationError::InvalidValue {
                    field: "runner_class",
                    value: value.to_string(),
                })?
            }
        };

        RunFields {
            id,
            provider: str_field(payload, "/provider")
                .unwrap_or("unknown")
                .to_lowercase(),
            repository,
            branch: str_field(payload, "/branch").unwrap_or_default().to_string(),
            commit_sha: str_field(payload, "/commit_sha").unwrap_or_default().to_string(),
            workflow_name: str_field(payload, "/workflow_name")
                .unwrap_or_default()
                .to_string(),
            runner_class,
            status,
            conclusion,
            started_at,
            finished_at,
        }
        .into_run()
    }
}

fn parse_status(value: &str) -> Result<RunStatus, NormalizationError> {
    match value.trim().to_lowercase().as_str() {
        "queued" => Ok(RunStatus::Queued),
        "in_progress" => Ok(RunStatus::InProgress),
        "completed" => Ok(RunStatus::Completed),
        _ => Err(NormalizationError::InvalidValue {
            field: "status",
            value: value.to_string(),
        }),
    }
}
