//! Newline-delimited JSON in and out of `serve`.

use bg_core::error::{DeployError, Result};
use bg_core::models::{DeploymentOutcome, DeploymentRequest, PushEvent};

/// Decode one push event line. Malformed input is a bad request.
pub fn parse_event(line: &str) -> Result<DeploymentRequest> {
    let event: PushEvent = serde_json::from_str(line)?;
    Ok(event.into())
}

pub fn render_outcome(outcome: &DeploymentOutcome) -> Result<String> {
    serde_json::to_string(outcome).map_err(DeployError::from)
}

/// Outcome for a line that never reached the coordinator.
pub fn rejected(error: DeployError) -> DeploymentOutcome {
    DeploymentOutcome::from(Err(error))
}
