use chrono::{DateTime, Utc};
use thiserror::Error;

use super::AuditRecord;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit store lock poisoned")]
    Poisoned,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Which audit records to return. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub ticket_id: Option<String>,
    /// Narrows to the trail of a single flow attempt.
    pub flow_id: Option<String>,
    /// Any of these event types; empty matches all.
    pub event_types: Vec<String>,
    pub user_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }

    pub fn with_ticket_id(mut self, ticket_id: impl Into<String>) -> Self {
        self.ticket_id = Some(ticket_id.into());
        self
    }

    pub fn with_flow_id(mut self, flow_id: impl Into<String>) -> Self {
        self.flow_id = Some(flow_id.into());
        self
    }

    /// Adds `event_type` to the accepted types.
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.push(event_type.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Events within `[from, to]`; either bound may be open.
    pub fn with_time_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// Same criteria without pagination, for totals.
    pub fn unpaged(&self) -> Self {
        Self {
            limit: i64::MAX,
            offset: 0,
            ..self.clone()
        }
    }
}

/// Persistence for the audit trail. Records are append-only.
pub trait AuditStore: Send + Sync {
    /// Append a record, returning its assigned id.
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError>;

    /// Matching records, newest first.
    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError>;
}
