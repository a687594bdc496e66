use super::{repository_or_hint, required_id, str_field, timestamp_field, RunFields};
use crate::error::NormalizationError;
use crate::run::{Conclusion, Run, RunStatus, RunnerClass};
use serde_json::Value;

/// Normalizer for GitLab CI pipeline payloads
/// (`GET /projects/:id/pipelines/:pipeline_id`).
pub struct GitLabPipelineNormalizer;

impl GitLabPipelineNormalizer {
    pub fn normalize(payload: &Value, repository_hint: Option<&str>) -> Result<Run, NormalizationError> {
        let id = required_id(payload)?;
        let repository = repository_or_hint(
            str_field(payload, "/project/path_with_namespace")
                .or_else(|| str_field(payload, "/project_path")),
            repository_hint,
        )?;

        let started_at = match timestamp_field(payload, "started_at")? {
            Some(ts) => ts,
            None => timestamp_field(payload, "created_at")?
                .ok_or(NormalizationError::MissingField { field: "started_at" })?,
        };
        let finished_at = timestamp_field(payload, "finished_at")?;

        let status_value = str_field(payload, "/status")
            .ok_or(NormalizationError::MissingField { field: "status" })?;
        let (status, conclusion) = parse_status(status_value)?;

        RunFields {
            id,
            provider: "gitlab".to_string(),
            repository,
            branch: str_field(payload, "/ref").unwrap_or_default().to_string(),
            commit_sha: str_field(payload, "/sha").unwrap_or_default().to_string(),
            workflow_name: str_field(payload, "/name")
                .or_else(|| str_field(payload, "/source"))
                .unwrap_or("pipeline")
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

/// GitLab folds status and outcome into one field.
fn parse_status(value: &str) -> Result<(RunStatus, Option<Conclusion>), NormalizationError> {
    let mapped = match value {
        "created" | "waiting_for_resource" | "preparing" | "pending" | "scheduled" | "manual" => {
            (RunStatus::Queued, None)
        }
        "running" | "canceling" => (RunStatus::InProgress, None),
        "success" => (RunStatus::Completed, Some(Conclusion::Success)),
        "failed" => (RunStatus::Completed, Some(Conclusion::Failure)),
        "canceled" | "cancelled" => (RunStatus::Completed, Some(Conclusion::Cancelled)),
        "skipped" => (RunStatus::Completed, Some(Conclusion::Skipped)),
        other => {
            return Err(NormalizationError::InvalidValue {
                field: "status",
                value: other.to_string(),
            })
        }
    };
    Ok(mapped)
}

fn detect_runner_class(payload: &Value) -> RunnerClass {
    if let Some(class) = str_field(payload, "/runner_class").and_then(RunnerClass::parse) {
        return class;
    }

    match payload.pointer("/runner/is_shared").and_then(Value::as_bool) {
        Some(true) => return RunnerClass::Hosted,
        Some(false) => return RunnerClass::SelfHosted,
        None => {}
    }

    // GitLab.com shared runners are targeted with `saas-*` tags.
    let tags: Vec<&str> = payload
        .get("tag_list")
        .and_then(Value::as_array)
        .map(|tags| tags.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if tags.iter().any(|t| t.eq_ignore_ascii_case("self-hosted")) {
        RunnerClass::SelfHosted
    } else if tags.iter().any(|t| t.starts_with("saas-")) {
        RunnerClass::Hosted
    } else {
        RunnerClass::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pipeline(status: &str) -> Value {
        json!({
            "id": 287,
            "project_id": 21,
            "status": status,
            "ref": "feature/login",
            "sha": "a91957a858320c0e17f3a0eca7cfacbff50ea29a",
            "source": "push",
            "created_at": "2024-04-02T09:00:00.000Z",
            "started_at": "2024-04-02T09:01:00.000Z",
            "finished_at": "2024-04-02T09:31:00.000Z",
            "project": { "path_with_namespace": "group/app" },
            "runner": { "is_shared": false }
        })
    }

    #[test]
    fn maps_pipeline_fields() {
        let run = GitLabPipelineNormalizer::normalize(&pipeline("failed"), None).unwrap();
        assert_eq!(run.id, "287");
        assert_eq!(run.provider, "gitlab");
        assert_eq!(run.repository, "group/app");
        assert_eq!(run.branch, "feature/login");
        assert_eq!(run.workflow_name, "push");
        assert_eq!(run.conclusion, Some(Conclusion::Failure));
        assert_eq!(run.duration_minutes, Some(30.0));
        assert_eq!(run.runner_class, RunnerClass::SelfHosted);
    }

    #[test]
    fn running_pipeline_has_no_conclusion() {
        let mut payload = pipeline("running");
        payload["finished_at"] = Value::Null;
        let run = GitLabPipelineNormalizer::normalize(&payload, None).unwrap();
        assert_eq!(run.status, RunStatus::InProgress);
        assert_eq!(run.conclusion, None);
        assert_eq!(run.duration_minutes, None);
    }

    #[test]
    fn finished_pipeline_without_finish_time_is_rejected() {
        let mut payload = pipeline("success");
        payload["finished_at"] = Value::Null;
        assert!(matches!(
            GitLabPipelineNormalizer::normalize(&payload, None),
            Err(NormalizationError::MissingFinishedAt { .. })
        ));
    }

    #[test]
    fn runner_class_from_tags() {
        let mut payload = pipeline("success");
        payload.as_object_mut().unwrap().remove("runner");
        payload["tag_list"] = json!(["docker", "self-hosted"]);
        let run = GitLabPipelineNormalizer::normalize(&payload, None).unwrap();
        assert_eq!(run.runner_class, RunnerClass::SelfHosted);

        payload["tag_list"] = json!(["saas-linux-small-amd64"]);
        let run = GitLabPipelineNormalizer::normalize(&payload, None).unwrap();
        assert_eq!(run.runner_class, RunnerClass::Hosted);

        payload["tag_list"] = json!([]);
        let run = GitLabPipelineNormalizer::normalize(&payload, None).unwrap();
        assert_eq!(run.runner_class, RunnerClass::Unknown);
    }

    #[test]
    fn canceled_maps_to_cancelled() {
        let run = GitLabPipelineNormalizer::normalize(&pipeline("canceled"), None).unwrap();
        assert_eq!(run.conclusion, Some(Conclusion::Cancelled));
    }
}
