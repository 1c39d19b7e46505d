use std::sync::Arc;

use ticketflow_core::{
    AuditHandle, AuditStore, Config, ReconciliationScheduler, SanitizedConfig, TicketFlowManager,
};

/// Shared application state
pub struct AppState {
    config: Config,
    manager: Arc<TicketFlowManager>,
    scheduler: Arc<ReconciliationScheduler>,
    audit: AuditHandle,
    audit_store: Arc<dyn AuditStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        manager: Arc<TicketFlowManager>,
        scheduler: Arc<ReconciliationScheduler>,
        audit: AuditHandle,
        audit_store: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            config,
            manager,
            scheduler,
            audit,
            audit_store,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn manager(&self) -> &TicketFlowManager {
        self.manager.as_ref()
    }

    pub fn scheduler(&self) -> &ReconciliationScheduler {
        self.scheduler.as_ref()
    }

    pub fn audit(&self) -> &AuditHandle {
        &self.audit
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }
}
