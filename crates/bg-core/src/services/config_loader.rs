use std::collections::HashMap;
use std::path::Path;

use crate::error::{DeployError, Result};
use crate::models::DaemonConfig;

pub const DEFAULT_CONFIG_FILENAME: &str = "bluegreen.yaml";

pub fn load(config_path: &Path) -> Result<DaemonConfig> {
    if !config_path.exists() {
        return Err(DeployError::ConfigNotFound(config_path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(config_path)?;
    parse(&contents)
}

pub fn parse(contents: &str) -> Result<DaemonConfig> {
    let mut config: DaemonConfig = serde_yaml::from_str(contents)
        .map_err(|e| DeployError::InvalidConfig(e.to_string()))?;
    for (name, service) in config.services.iter_mut() {
        service.name = name.clone();
    }
    validate(&config)?;
    Ok(config)
}

fn validate(config: &DaemonConfig) -> Result<()> {
    if config.services.is_empty() {
        return Err(DeployError::InvalidConfig(
            "at least one service is required".into(),
        ));
    }
    if config.control_timeout_secs == 0 {
        return Err(DeployError::InvalidConfig(
            "control_timeout_secs must be positive".into(),
        ));
    }

    let mut sources: HashMap<(&str, &str), &str> = HashMap::new();
    let mut listen_ports: HashMap<u16, &str> = HashMap::new();

    for (name, service) in &config.services {
        if name.is_empty() || name.contains(['/', '@', '.']) {
            return Err(DeployError::InvalidConfig(format!(
                "service name '{name}' must be non-empty and free of '/', '@' and '.'"
            )));
        }
        if service.repository_url.is_empty() || service.branch.is_empty() {
            return Err(DeployError::InvalidConfig(format!(
                "{name}: repository_url and branch are required"
            )));
        }
        if service.deployments_dir.as_os_str().is_empty() {
            return Err(DeployError::InvalidConfig(format!(
                "{name}: deployments_dir is required"
            )));
        }
        let [blue, green] = service.target_ports;
        if blue == green {
            return Err(DeployError::InvalidConfig(format!(
                "{name}: target ports must differ"
            )));
        }
        if service.target_ports.contains(&service.listen_port) {
            return Err(DeployError::InvalidConfig(format!(
                "{name}: listen_port must differ from the target ports"
            )));
        }
        if let Some(other) = sources.insert(
            (service.repository_url.as_str(), service.branch.as_str()),
            name,
        ) {
            return Err(DeployError::InvalidConfig(format!(
                "{name} and {other} both deploy {}@{}",
                service.repository_url, service.branch
            )));
        }
        if let Some(other) = listen_ports.insert(service.listen_port, name) {
            return Err(DeployError::InvalidConfig(format!(
                "{name} and {other} both listen on port {}",
                service.listen_port
            )));
        }
    }
    Ok(())
}
