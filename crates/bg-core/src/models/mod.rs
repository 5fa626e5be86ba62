pub mod config;
pub mod outcome;
pub mod request;
pub mod service;
pub mod slot;

pub use config::{ControlPlaneScope, DaemonConfig, TrafficMode};
pub use outcome::{DeploymentOutcome, DeploymentReport};
pub use request::{DeploymentRequest, PushEvent};
pub use service::{RunAs, ServiceDefinition, UnitName};
pub use slot::{ParseSlotError, Slot};
