use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use super::service::ServiceDefinition;

/// Which traffic switch strategy to construct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficMode {
    Iptables,
    Forwarder,
    /// Kernel rules when privileged, embedded forwarder otherwise.
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlPlaneScope {
    #[default]
    System,
    User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub traffic: TrafficMode,
    #[serde(default)]
    pub control_plane: ControlPlaneScope,
    #[serde(default = "default_control_timeout_secs")]
    pub control_timeout_secs: u64,
    #[serde(default = "default_target_host")]
    pub target_host: String,
    pub services: BTreeMap<String, ServiceDefinition>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib")
}

fn default_control_timeout_secs() -> u64 {
    5
}

fn default_target_host() -> String {
    "127.0.0.1".to_string()
}
