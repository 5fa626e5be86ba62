use chrono::{DateTime, Utc};
use serde::Serialize;

use super::slot::Slot;
use crate::error::DeployError;

/// Record of a completed deployment.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentReport {
    pub service: String,
    pub previous_slot: Slot,
    pub active_slot: Slot,
    pub commit_sha: String,
    /// False when stopping the retired slot failed; its process is leaked.
    pub previous_stopped: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// What the coordinator hands back to the inbound layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentOutcome {
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<DeploymentReport>,
}

impl DeploymentOutcome {
    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}

impl From<Result<DeploymentReport, DeployError>> for DeploymentOutcome {
    fn from(result: Result<DeploymentReport, DeployError>) -> Self {
        match result {
            Ok(report) => Self {
                status_code: 200,
                error_kind: None,
                error_detail: None,
                report: Some(report),
            },
            Err(e) => Self {
                status_code: e.status_code(),
                error_kind: Some(e.kind()),
                error_detail: Some(e.to_string()),
                report: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_outcome_carries_status_and_detail() {
        let outcome = DeploymentOutcome::from(Err(DeployError::BadRequest(
            "commit SHA missing".into(),
        )));
        assert_eq!(outcome.status_code, 400);
        assert!(!outcome.is_success());
        assert_eq!(outcome.error_kind, Some("bad_request"));
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"statusCode\":400"));
        assert!(json.contains("\"errorDetail\":\"bad request: commit SHA missing\""));
        assert!(!json.contains("report"));
    }

    #[test]
    fn success_outcome_serializes_slots_lowercase() {
        let now = Utc::now();
        let outcome = DeploymentOutcome::from(Ok(DeploymentReport {
            service: "api".into(),
            previous_slot: Slot::Blue,
            active_slot: Slot::Green,
            commit_sha: "abc123".into(),
            previous_stopped: true,
            started_at: now,
            finished_at: now,
        }));
        assert!(outcome.is_success());
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"activeSlot\":\"green\""));
        assert!(json.contains("\"previousSlot\":\"blue\""));
        assert!(!json.contains("errorDetail"));
    }
}
