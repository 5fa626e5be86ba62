use serde::Deserialize;

const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// Source-control push notification, already signature-verified upstream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref", default)]
    pub git_ref: String,
    #[serde(default)]
    pub head_commit: Option<HeadCommit>,
    #[serde(default)]
    pub repository: Repository,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeadCommit {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub clone_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRequest {
    pub repository_url: String,
    pub git_ref: String,
    pub commit_sha: String,
}

impl DeploymentRequest {
    pub fn new(repository_url: &str, git_ref: &str, commit_sha: &str) -> Self {
        Self {
            repository_url: repository_url.to_string(),
            git_ref: git_ref.to_string(),
            commit_sha: commit_sha.to_string(),
        }
    }

    /// Branch encoded in the ref, `None` for tags and other non-branch refs.
    pub fn branch(&self) -> Option<&str> {
        self.git_ref
            .strip_prefix(BRANCH_REF_PREFIX)
            .filter(|b| !b.is_empty())
    }
}

impl From<PushEvent> for DeploymentRequest {
    fn from(event: PushEvent) -> Self {
        Self {
            repository_url: event.repository.clone_url,
            git_ref: event.git_ref,
            commit_sha: event.head_commit.map(|c| c.id).unwrap_or_default(),
        }
    }
}
