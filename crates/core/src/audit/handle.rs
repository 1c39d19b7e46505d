use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::AuditEvent;

/// Audit event stamped with the time it was emitted
#[derive(Debug, Clone)]
pub struct AuditEventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
}

impl AuditEventEnvelope {
    fn now(event: AuditEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Cloneable sender side of the audit channel.
///
/// Emitting never fails the caller: a full or closed channel is logged and
/// the event dropped.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditEventEnvelope>,
}

impl AuditHandle {
    pub fn new(tx: mpsc::Sender<AuditEventEnvelope>) -> Self {
        Self { tx }
    }

    /// Emit an event, waiting for channel capacity.
    pub async fn emit(&self, event: AuditEvent) {
        let event_type = event.event_type();
        if self.tx.send(AuditEventEnvelope::now(event)).await.is_err() {
            tracing::error!(event_type, "Audit channel closed, event dropped");
        }
    }

    /// Emit without waiting. Returns false when the event was dropped.
    pub fn try_emit(&self, event: AuditEvent) -> bool {
        let event_type = event.event_type();
        match self.tx.try_send(AuditEventEnvelope::now(event)) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(event_type, error = %e, "Failed to emit audit event");
                false
            }
        }
    }
}
