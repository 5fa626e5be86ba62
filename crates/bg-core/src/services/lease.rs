use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Held for the full duration of one deployment; dropping it releases the service.
pub type DeploymentLease = OwnedMutexGuard<()>;

/// Per-service mutual exclusion for deployments.
///
/// Deployments of the same service queue behind each other; different
/// services never contend.
#[derive(Default)]
pub struct DeploymentLeases {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeploymentLeases {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, service: &str) -> DeploymentLease {
        let lock = self
            .locks
            .lock()
            .await
            .entry(service.to_string())
            .or_default()
            .clone();
        if let Ok(lease) = lock.clone().try_lock_owned() {
            return lease;
        }
        tracing::info!(service, "deployment already running, waiting for it to finish");
        lock.lock_owned().await
    }

    /// `None` when a deployment of `service` is in progress.
    pub async fn try_acquire(&self, service: &str) -> Option<DeploymentLease> {
        let lock = self
            .locks
            .lock()
            .await
            .entry(service.to_string())
            .or_default()
            .clone();
        lock.try_lock_owned().ok()
    }
}
