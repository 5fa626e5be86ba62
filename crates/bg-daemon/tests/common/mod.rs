// Each test binary compiles this module independently and uses a different
// subset of helpers, so unused-function warnings are expected.
#![allow(dead_code)]

use chrono::{TimeZone, Utc};

use bg_core::models::{DeploymentReport, Slot};
use bg_core::services::config_loader;
use bg_core::services::registry::ServiceRegistry;

pub const TWO_SERVICES: &str = r#"
services:
  api:
    repository_url: https://example.com/acme/api.git
    branch: main
    deployments_dir: /srv/api
    listen_port: 8080
    target_ports: [8081, 8082]
  billing:
    repository_url: https://example.com/acme/billing.git
    branch: production
    deployments_dir: /srv/billing
    listen_port: 9000
    target_ports: [9001, 9002]
"#;

pub fn registry(yaml: &str) -> ServiceRegistry {
    let config = config_loader::parse(yaml).unwrap();
    ServiceRegistry::new(config.services).unwrap()
}

/// A report with fixed timestamps for deterministic snapshots.
pub fn report(service: &str, previous: Slot, commit: &str) -> DeploymentReport {
    DeploymentReport {
        service: service.to_string(),
        previous_slot: previous,
        active_slot: previous.opposite(),
        commit_sha: commit.to_string(),
        previous_stopped: true,
        started_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        finished_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 7).unwrap(),
    }
}
