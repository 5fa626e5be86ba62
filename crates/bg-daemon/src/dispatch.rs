//! Ordering of inbound deployments.
//!
//! Every service gets one queue drained by one worker, so pushes for the same
//! service run one after another in arrival order while different services
//! deploy in parallel. Requests that match no service share a queue of
//! their own and are answered with a rejection.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use bg_core::error::DeployError;
use bg_core::models::{DeploymentOutcome, DeploymentRequest};
use bg_core::services::coordinator::Coordinator;

use crate::events;

const UNROUTED: &str = "";

pub struct Dispatcher {
    coordinator: Arc<Coordinator>,
    outcomes: mpsc::UnboundedSender<DeploymentOutcome>,
    queues: HashMap<String, mpsc::UnboundedSender<DeploymentRequest>>,
    workers: JoinSet<()>,
}

impl Dispatcher {
    pub fn new(
        coordinator: Arc<Coordinator>,
        outcomes: mpsc::UnboundedSender<DeploymentOutcome>,
    ) -> Self {
        Self {
            coordinator,
            outcomes,
            queues: HashMap::new(),
            workers: JoinSet::new(),
        }
    }

    /// Queue `request` behind earlier requests for the same service.
    pub fn submit(&mut self, request: DeploymentRequest) {
        let key = self
            .coordinator
            .services()
            .resolve(&request)
            .map_or(UNROUTED, |service| service.name.as_str())
            .to_string();

        if !self.queues.contains_key(&key) {
            let (tx, rx) = mpsc::unbounded_channel();
            self.workers.spawn(drain_queue(
                self.coordinator.clone(),
                rx,
                self.outcomes.clone(),
            ));
            self.queues.insert(key.clone(), tx);
        }
        if let Some(queue) = self.queues.get(&key) {
            if queue.send(request).is_err() {
                tracing::error!(queue = %key, "deployment worker is gone, request dropped");
            }
        }
    }

    /// Answer a request that never reached the coordinator.
    pub fn reject(&self, error: DeployError) {
        let _ = self.outcomes.send(events::rejected(error));
    }

    /// Close every queue and wait for queued deployments to finish.
    pub async fn finish(mut self) {
        self.queues.clear();
        if !self.workers.is_empty() {
            tracing::info!(queues = self.workers.len(), "waiting for queued deployments");
        }
        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("deployment worker aborted: {e}");
            }
        }
    }
}

async fn drain_queue(
    coordinator: Arc<Coordinator>,
    mut requests: mpsc::UnboundedReceiver<DeploymentRequest>,
    outcomes: mpsc::UnboundedSender<DeploymentOutcome>,
) {
    while let Some(request) = requests.recv().await {
        let outcome = coordinator.execute(&request).await;
        if outcomes.send(outcome).is_err() {
            tracing::warn!("outcome reader closed");
        }
    }
}
