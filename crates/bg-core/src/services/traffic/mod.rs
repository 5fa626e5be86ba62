//! Routing a service's public port to whichever slot is live.
//!
//! Two interchangeable strategies sit behind [`TrafficSwitch`]:
//!
//! - **`iptables`**: DNAT rules in the `nat` table, rewritten on cutover.
//! - **`forwarder`**: an in-process TCP forwarder whose listener is
//!   drained and rebound on cutover, for hosts where rule manipulation
//!   is not permitted.

pub mod forwarder;
pub mod iptables;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::TrafficMode;

pub use forwarder::{Forwarder, ForwarderSwitch};
pub use iptables::{IptablesCommand, KernelRuleSwitch, NatRule, RuleTable};

#[async_trait]
pub trait TrafficSwitch: Send + Sync {
    /// Make `listen_port` reach `new_target` and stop it reaching `old_target`.
    async fn cutover(&self, listen_port: u16, new_target: u16, old_target: u16) -> Result<()>;

    /// Release anything the strategy holds open.
    async fn shutdown(&self) {}

    fn name(&self) -> &'static str;
}

/// Settle `Auto` into a concrete strategy.
pub fn resolve_mode(mode: TrafficMode, privileged: bool) -> TrafficMode {
    match mode {
        TrafficMode::Auto if privileged => TrafficMode::Iptables,
        TrafficMode::Auto => TrafficMode::Forwarder,
        explicit => explicit,
    }
}

/// The strategy `mode` settles into for this process.
pub fn effective_mode(mode: TrafficMode) -> TrafficMode {
    resolve_mode(mode, is_privileged())
}

pub fn build_switch(mode: TrafficMode, target_host: &str) -> Arc<dyn TrafficSwitch> {
    match effective_mode(mode) {
        TrafficMode::Iptables => Arc::new(KernelRuleSwitch::new(
            Arc::new(IptablesCommand::default()),
            target_host,
        )),
        _ => Arc::new(ForwarderSwitch::new(target_host)),
    }
}

#[cfg(unix)]
fn is_privileged() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_privileged() -> bool {
    false
}
