use std::path::PathBuf;
use std::time::Duration;

/// How a single control-plane round-trip went wrong.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlPlaneFailure {
    #[error("could not reach control plane: {0}")]
    Connect(String),

    #[error("{unit}: job finished with result '{result}'")]
    Rejected { unit: String, result: String },

    #[error("{unit}: no completion signal within {}s", .after.as_secs_f64())]
    Timeout { unit: String, after: Duration },

    #[error("{unit}: reply channel closed before completion")]
    ReplyDropped { unit: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized repository or branch")]
    Unauthorized,

    #[error("config file not found at {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("workspace sync failed: {0}")]
    Sync(String),

    #[error("pre-start hook failed: {0}")]
    Hook(String),

    #[error("control plane failure: {0}")]
    ControlPlane(#[from] ControlPlaneFailure),

    #[error("traffic cutover failed: {0}")]
    Cutover(String),

    #[error("active slot persistence failed: {0}")]
    StatePersist(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DeployError {
    /// HTTP-style status the webhook layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            DeployError::BadRequest(_) | DeployError::Json(_) => 400,
            DeployError::Unauthorized => 403,
            _ => 500,
        }
    }

    /// Stable label for logs and outcome payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::BadRequest(_) | DeployError::Json(_) => "bad_request",
            DeployError::Unauthorized => "unauthorized",
            DeployError::ConfigNotFound(_) | DeployError::InvalidConfig(_) => "config_error",
            DeployError::Sync(_) => "sync_failure",
            DeployError::Hook(_) => "hook_failure",
            DeployError::ControlPlane(ControlPlaneFailure::Timeout { .. }) => "control_plane_timeout",
            DeployError::ControlPlane(_) => "control_plane_failure",
            DeployError::Cutover(_) => "cutover_failure",
            DeployError::StatePersist(_) => "state_persist_failure",
            DeployError::Io(_) => "io_error",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            DeployError::ControlPlane(ControlPlaneFailure::Timeout { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
