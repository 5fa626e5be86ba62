//! Blue/green cutover sequencing.
//!
//! A deployment runs strictly in order: sync the standby slot, restart it,
//! move traffic, stop the retired slot, record the new active slot. Every
//! step before the traffic move aborts with the live slot untouched.
//! Stopping the retired slot is best effort. A failure to record the new
//! slot is reported but not rolled back: traffic already points at the new
//! slot and the record must be reconciled by hand.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{DeployError, Result};
use crate::models::{DeploymentOutcome, DeploymentReport, DeploymentRequest, Slot};
use crate::services::control::UnitController;
use crate::services::lease::DeploymentLeases;
use crate::services::registry::ServiceRegistry;
use crate::services::state::SlotStore;
use crate::services::traffic::TrafficSwitch;
use crate::services::workspace::Workspace;

pub struct Coordinator {
    services: ServiceRegistry,
    state: Arc<dyn SlotStore>,
    workspace: Arc<dyn Workspace>,
    units: Arc<dyn UnitController>,
    traffic: Arc<dyn TrafficSwitch>,
    leases: DeploymentLeases,
}

impl Coordinator {
    pub fn new(
        services: ServiceRegistry,
        state: Arc<dyn SlotStore>,
        workspace: Arc<dyn Workspace>,
        units: Arc<dyn UnitController>,
        traffic: Arc<dyn TrafficSwitch>,
    ) -> Self {
        Self {
            services,
            state,
            workspace,
            units,
            traffic,
            leases: DeploymentLeases::new(),
        }
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn traffic(&self) -> &Arc<dyn TrafficSwitch> {
        &self.traffic
    }

    /// Run one deployment and fold the result into an outcome for the caller.
    pub async fn execute(&self, request: &DeploymentRequest) -> DeploymentOutcome {
        let result = self.deploy(request).await;
        match &result {
            Ok(report) => tracing::info!(
                service = %report.service,
                slot = %report.active_slot,
                commit = %report.commit_sha,
                "deployment successful"
            ),
            Err(DeployError::Unauthorized) => {
                tracing::warn!(repository = %request.repository_url, git_ref = %request.git_ref, "rejected deployment for unknown repository or branch")
            }
            Err(e) => tracing::error!(
                repository = %request.repository_url,
                git_ref = %request.git_ref,
                kind = e.kind(),
                "deployment failed: {e}"
            ),
        }
        DeploymentOutcome::from(result)
    }

    pub async fn deploy(&self, request: &DeploymentRequest) -> Result<DeploymentReport> {
        let service = self
            .services
            .resolve(request)
            .ok_or(DeployError::Unauthorized)?;
        if request.commit_sha.trim().is_empty() {
            return Err(DeployError::BadRequest("commit SHA missing".into()));
        }

        let _lease = self.leases.acquire(&service.name).await;
        let started_at = Utc::now();

        let current = self.state.get(&service.name).await;
        let next = current.opposite();
        tracing::info!(
            service = %service.name,
            %current,
            %next,
            commit = %request.commit_sha,
            "starting deployment"
        );

        self.workspace
            .prepare(service, next, &request.commit_sha)
            .await?;

        self.units.restart(&service.unit(next)).await?;

        self.traffic
            .cutover(
                service.listen_port,
                service.target_port(next),
                service.target_port(current),
            )
            .await?;
        tracing::info!(
            service = %service.name,
            listen_port = service.listen_port,
            target_port = service.target_port(next),
            "traffic switched"
        );

        let previous_stopped = match self.units.stop(&service.unit(current)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    service = %service.name,
                    slot = %current,
                    "traffic moved but the previous slot could not be stopped: {e}"
                );
                false
            }
        };

        if let Err(e) = self.state.set(&service.name, next).await {
            tracing::error!(
                service = %service.name,
                live = %next,
                recorded = %current,
                "traffic is on the new slot but the active slot record is stale, reconcile manually: {e}"
            );
            return Err(e);
        }

        Ok(DeploymentReport {
            service: service.name.clone(),
            previous_slot: current,
            active_slot: next,
            commit_sha: request.commit_sha.clone(),
            previous_stopped,
            started_at,
            finished_at: Utc::now(),
        })
    }

    pub async fn active_slot(&self, service: &str) -> Option<Slot> {
        self.services.get(service)?;
        Some(self.state.get(service).await)
    }

    /// Point every service's public port at its recorded active slot.
    ///
    /// Run at startup so routes held in memory come back after a restart.
    pub async fn reconcile(&self) -> Result<()> {
        for service in self.services.iter() {
            let _lease = self.leases.acquire(&service.name).await;
            let active = self.state.get(&service.name).await;
            self.traffic
                .cutover(
                    service.listen_port,
                    service.target_port(active),
                    service.target_port(active.opposite()),
                )
                .await?;
            tracing::info!(service = %service.name, slot = %active, "traffic restored");
        }
        Ok(())
    }
}
