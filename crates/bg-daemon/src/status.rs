use bg_core::models::Slot;
use bg_core::services::registry::ServiceRegistry;
use bg_core::services::state::SlotStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub service: String,
    pub active: Slot,
    pub listen_port: u16,
    pub target_port: u16,
}

pub async fn collect(services: &ServiceRegistry, state: &dyn SlotStore) -> Vec<StatusRow> {
    let mut rows = Vec::with_capacity(services.len());
    for service in services.iter() {
        let active = state.get(&service.name).await;
        rows.push(StatusRow {
            service: service.name.clone(),
            active,
            listen_port: service.listen_port,
            target_port: service.target_port(active),
        });
    }
    rows
}

/// One aligned line per service: name, live slot, public port -> slot port.
pub fn render(rows: &[StatusRow]) -> String {
    let width = rows.iter().map(|r| r.service.len()).max().unwrap_or(0);
    rows.iter()
        .map(|r| {
            format!(
                "{:<width$}  {:<5}  {}->{}\n",
                r.service,
                r.active.as_str(),
                r.listen_port,
                r.target_port
            )
        })
        .collect()
}
