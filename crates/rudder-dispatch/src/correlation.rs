//! Inbound GitHub `workflow_run` correlation
//!
//! The run name carries the job id; the run status and conclusion map onto
//! the job state machine.

use chrono::{DateTime, Utc};
use regex::Regex;
use rudder_types::{JobId, JobStatus, JobStatusUpdate};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// `workflow_run` webhook payload, reduced to the fields used here
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRunEvent {
    #[serde(default)]
    pub action: Option<String>,
    pub workflow_run: WorkflowRun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,

    #[serde(default)]
    pub name: Option<String>,

    /// Rendered run name; workflows set it through `run-name`
    #[serde(default)]
    pub display_title: Option<String>,

    pub status: String,

    #[serde(default)]
    pub conclusion: Option<String>,

    #[serde(default)]
    pub html_url: Option<String>,

    #[serde(default)]
    pub run_started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A job update derived from a workflow run
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedUpdate {
    pub job_id: JobId,
    pub update: JobStatusUpdate,
}

const UUID_PATTERN: &str =
    r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}";

fn uuid_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(UUID_PATTERN).ok()).as_ref()
}

/// First UUID found in `text`
pub fn extract_job_id(text: &str) -> Option<JobId> {
    uuid_pattern()?
        .find_iter(text)
        .find_map(|m| m.as_str().parse().ok())
}

/// Map GitHub run status and conclusion onto a job status
pub fn map_status(status: &str, conclusion: Option<&str>) -> JobStatus {
    if status != "completed" {
        return JobStatus::InProgress;
    }
    match conclusion {
        Some("success") => JobStatus::Successful,
        Some("cancelled") => JobStatus::Cancelled,
        Some("neutral") | Some("skipped") => JobStatus::Skipped,
        _ => JobStatus::Failure,
    }
}

impl WorkflowRun {
    /// Job this run belongs to, from its display title or name
    pub fn job_id(&self) -> Option<JobId> {
        [self.display_title.as_deref(), self.name.as_deref()]
            .into_iter()
            .flatten()
            .find_map(extract_job_id)
    }

    pub fn to_update(&self) -> JobStatusUpdate {
        let status = map_status(&self.status, self.conclusion.as_deref());
        JobStatusUpdate {
            status,
            message: self.html_url.clone(),
            external_id: Some(self.id.to_string()),
            started_at: self.run_started_at,
            completed_at: if status.is_terminal() {
                self.updated_at
            } else {
                None
            },
        }
    }

    pub fn correlate(&self) -> Option<CorrelatedUpdate> {
        Some(CorrelatedUpdate {
            job_id: self.job_id()?,
            update: self.to_update(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("queued", None), JobStatus::InProgress);
        assert_eq!(map_status("in_progress", None), JobStatus::InProgress);
        assert_eq!(map_status("completed", Some("success")), JobStatus::Successful);
        assert_eq!(map_status("completed", Some("cancelled")), JobStatus::Cancelled);
        assert_eq!(map_status("completed", Some("neutral")), JobStatus::Skipped);
        assert_eq!(map_status("completed", Some("skipped")), JobStatus::Skipped);
        assert_eq!(map_status("completed", Some("timed_out")), JobStatus::Failure);
        assert_eq!(map_status("completed", None), JobStatus::Failure);
    }

    #[test]
    fn test_job_id_from_run_name() {
        let id = JobId::generate();
        let text = format!("Deploy api to prod [{}]", id);
        assert_eq!(extract_job_id(&text), Some(id));
        assert_eq!(extract_job_id("Deploy api to prod"), None);
    }

    #[test]
    fn test_parse_workflow_run_event() {
        let id = JobId::generate();
        let payload = json!({
            "action": "completed",
            "workflow_run": {
                "id": 991,
                "name": "deploy",
                "display_title": format!("deploy {}", id),
                "status": "completed",
                "conclusion": "success",
                "html_url": "https://github.com/acme/deploys/actions/runs/991",
                "run_started_at": "2026-03-01T10:00:00Z",
                "updated_at": "2026-03-01T10:05:00Z"
            }
        });
        let event: WorkflowRunEvent = serde_json::from_value(payload).unwrap();
        let correlated = event.workflow_run.correlate().unwrap();

        assert_eq!(correlated.job_id, id);
        assert_eq!(correlated.update.status, JobStatus::Successful);
        assert_eq!(correlated.update.external_id.as_deref(), Some("991"));
        assert!(correlated.update.completed_at.is_some());
    }

    #[test]
    fn test_running_run_has_no_completion() {
        let run = WorkflowRun {
            id: 5,
            name: Some(format!("deploy {}", JobId::generate())),
            display_title: None,
            status: "in_progress".into(),
            conclusion: None,
            html_url: None,
            run_started_at: None,
            updated_at: Some(Utc::now()),
        };
        let update = run.to_update();
        assert_eq!(update.status, JobStatus::InProgress);
        assert!(update.completed_at.is_none());
    }
}
