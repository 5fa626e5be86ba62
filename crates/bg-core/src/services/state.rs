use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{DeployError, Result};
use crate::models::Slot;

const STATE_FILE_NAME: &str = "active_service.txt";

/// Durable record of which slot is live, per service.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Never fails: a missing or unreadable record means `Slot::Blue`.
    async fn get(&self, service: &str) -> Slot;

    async fn set(&self, service: &str, slot: Slot) -> Result<()>;
}

/// One small text file per service: `<root>/<service>/active_service.txt`.
///
/// Writes are plain overwrites with no rename or locking; a torn write reads
/// back as the bootstrap default.
pub struct SlotStateStore {
    root: PathBuf,
}

impl SlotStateStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn state_file_path(&self, service: &str) -> PathBuf {
        self.root.join(service).join(STATE_FILE_NAME)
    }
}

#[async_trait]
impl SlotStore for SlotStateStore {
    async fn get(&self, service: &str) -> Slot {
        let path = self.state_file_path(service);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(service, path = %path.display(), "unreadable state file, assuming blue: {e}");
                }
                return Slot::default();
            }
        };
        match contents.parse() {
            Ok(slot) => slot,
            Err(e) => {
                tracing::warn!(service, path = %path.display(), "corrupt state file, assuming blue: {e}");
                Slot::default()
            }
        }
    }

    async fn set(&self, service: &str, slot: Slot) -> Result<()> {
        let path = self.state_file_path(service);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DeployError::StatePersist(format!("failed to create state dir: {e}"))
            })?;
        }
        tokio::fs::write(&path, slot.as_str())
            .await
            .map_err(|e| DeployError::StatePersist(format!("failed to write state file: {e}")))?;
        Ok(())
    }
}
