use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Ticket lifecycle
    TicketCreated {
        ticket_id: String,
        ticket_type: String,
        creator: String,
        flow_count: usize,
    },
    /// Ticket status change notification.
    TicketStatusChanged {
        ticket_id: String,
        from_status: String,
        to_status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    TicketRevoked {
        ticket_id: String,
        revoked_by: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    TicketTerminated {
        ticket_id: String,
        terminated_by: String,
        reason: String,
    },

    // Flow lifecycle
    FlowAdmitted {
        ticket_id: String,
        flow_id: String,
        exclusive_key: String,
    },
    FlowQueued {
        ticket_id: String,
        flow_id: String,
        exclusive_key: String,
        /// Position in the wait list (0 = next).
        position: usize,
    },
    FlowStatusChanged {
        ticket_id: String,
        flow_id: String,
        from_status: String,
        to_status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    FlowRetried {
        ticket_id: String,
        flow_id: String,
        retry_count: u32,
        /// "exclusive" for re-admission, "auto_retry" for a continuation flow.
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_flow_id: Option<String>,
    },
    /// A pipeline report contradicted the stored flow status.
    InconsistentUpdateRejected {
        ticket_id: String,
        flow_id: String,
        node_id: String,
        current_status: String,
        reported_status: String,
    },

    // Reconciliation
    ReconciliationCompleted {
        task: String,
        examined: usize,
        changed: usize,
        duration_ms: u64,
    },
    RepairTicketCreated {
        ticket_id: String,
        cluster_id: u64,
        table_count: usize,
    },
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::TicketCreated { .. } => "ticket_created",
            Self::TicketStatusChanged { .. } => "ticket_status_changed",
            Self::TicketRevoked { .. } => "ticket_revoked",
            Self::TicketTerminated { .. } => "ticket_terminated",
            Self::FlowAdmitted { .. } => "flow_admitted",
            Self::FlowQueued { .. } => "flow_queued",
            Self::FlowStatusChanged { .. } => "flow_status_changed",
            Self::FlowRetried { .. } => "flow_retried",
            Self::InconsistentUpdateRejected { .. } => "inconsistent_update_rejected",
            Self::ReconciliationCompleted { .. } => "reconciliation_completed",
            Self::RepairTicketCreated { .. } => "repair_ticket_created",
        }
    }

    /// Extract ticket_id if this event is ticket-related
    pub fn ticket_id(&self) -> Option<&str> {
        match self {
            Self::TicketCreated { ticket_id, .. }
            | Self::TicketStatusChanged { ticket_id, .. }
            | Self::TicketRevoked { ticket_id, .. }
            | Self::TicketTerminated { ticket_id, .. }
            | Self::FlowAdmitted { ticket_id, .. }
            | Self::FlowQueued { ticket_id, .. }
            | Self::FlowStatusChanged { ticket_id, .. }
            | Self::FlowRetried { ticket_id, .. }
            | Self::InconsistentUpdateRejected { ticket_id, .. }
            | Self::RepairTicketCreated { ticket_id, .. } => Some(ticket_id),
            Self::ServiceStarted { .. }
            | Self::ServiceStopped { .. }
            | Self::ReconciliationCompleted { .. } => None,
        }
    }

    /// Flow the event concerns, for flow-level events
    pub fn flow_id(&self) -> Option<&str> {
        match self {
            Self::FlowAdmitted { flow_id, .. }
            | Self::FlowQueued { flow_id, .. }
            | Self::FlowStatusChanged { flow_id, .. }
            | Self::FlowRetried { flow_id, .. }
            | Self::InconsistentUpdateRejected { flow_id, .. } => Some(flow_id),
            _ => None,
        }
    }

    /// Extract the acting user if the event has one
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::TicketCreated { creator, .. } => Some(creator),
            Self::TicketRevoked { revoked_by, .. } => Some(revoked_by),
            Self::TicketTerminated { terminated_by, .. } => Some(terminated_by),
            _ => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub ticket_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    pub user_id: Option<String>,
    pub data: AuditEvent,
}
