use std::collections::BTreeMap;

use crate::error::{DeployError, Result};
use crate::models::{DeploymentRequest, ServiceDefinition};

/// Configured services keyed by name.
///
/// Every `(repository_url, branch)` pair maps to at most one service, so
/// resolving a request never depends on iteration order.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, ServiceDefinition>,
}

impl ServiceRegistry {
    pub fn new(services: BTreeMap<String, ServiceDefinition>) -> Result<Self> {
        let mut registry = Self::default();
        for (name, mut service) in services {
            service.name = name;
            registry.insert(service)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, service: ServiceDefinition) -> Result<()> {
        if let Some(existing) = self.services.values().find(|s| {
            s.name != service.name
                && s.repository_url == service.repository_url
                && s.branch == service.branch
        }) {
            return Err(DeployError::InvalidConfig(format!(
                "{} and {} both deploy {}@{}",
                service.name, existing.name, service.repository_url, service.branch
            )));
        }
        self.services.insert(service.name.clone(), service);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.get(name)
    }

    pub fn resolve(&self, request: &DeploymentRequest) -> Option<&ServiceDefinition> {
        let branch = request.branch()?;
        self.services
            .values()
            .find(|s| s.repository_url == request.repository_url && s.branch == branch)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
