use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::slot::Slot;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAs {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub group: String,
}

impl RunAs {
    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.group.is_empty()
    }

    /// `user:group` argument for chown; either side may be empty.
    pub fn owner_spec(&self) -> String {
        match (self.user.is_empty(), self.group.is_empty()) {
            (false, false) => format!("{}:{}", self.user, self.group),
            (false, true) => self.user.clone(),
            _ => format!(":{}", self.group),
        }
    }
}

/// A deployable service as configured. Immutable for the life of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Filled from the config map key.
    #[serde(skip)]
    pub name: String,
    pub repository_url: String,
    pub branch: String,
    pub deployments_dir: PathBuf,
    #[serde(default)]
    pub executable: String,
    #[serde(default)]
    pub pre_start_hook: String,
    pub listen_port: u16,
    /// Index 0 is blue, index 1 is green.
    pub target_ports: [u16; 2],
    #[serde(default, skip_serializing_if = "RunAs::is_empty")]
    pub run_as: RunAs,
}

impl ServiceDefinition {
    pub fn target_port(&self, slot: Slot) -> u16 {
        self.target_ports[slot.index()]
    }

    pub fn slot_directory(&self, slot: Slot) -> PathBuf {
        self.deployments_dir.join(slot.as_str())
    }

    pub fn unit(&self, slot: Slot) -> UnitName {
        UnitName::new(&self.name, slot)
    }
}

/// Control-plane identity of a service running in one slot, `<service>.<slot>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitName {
    pub service: String,
    pub slot: Slot,
}

impl UnitName {
    pub fn new(service: &str, slot: Slot) -> Self {
        Self {
            service: service.to_string(),
            slot,
        }
    }

    /// systemd template instance addressing this unit.
    pub fn systemd_unit(&self) -> String {
        format!("{}@{}.service", self.service, self.slot)
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.slot)
    }
}
