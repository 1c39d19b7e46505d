//! Ticket storage trait and types.

use std::fmt;

use chrono::{DateTime, Utc};

use super::{Flow, FlowPlan, FlowStatus, FlowUpdate, NewFlow, Ticket, TicketStatus, TicketType};

/// Error type for ticket operations.
#[derive(Debug)]
pub enum TicketError {
    /// Ticket not found.
    NotFound(String),
    /// Flow not found.
    FlowNotFound(String),
    /// Cannot perform operation due to current state.
    InvalidState {
        ticket_id: String,
        current_state: String,
        operation: String,
    },
    /// Database error.
    Database(String),
}

impl fmt::Display for TicketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketError::NotFound(id) => write!(f, "Ticket not found: {}", id),
            TicketError::FlowNotFound(id) => write!(f, "Flow not found: {}", id),
            TicketError::InvalidState {
                ticket_id,
                current_state,
                operation,
            } => write!(
                f,
                "Cannot {} ticket {}: current state is {}",
                operation, ticket_id, current_state
            ),
            TicketError::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for TicketError {}

impl From<rusqlite::Error> for TicketError {
    fn from(e: rusqlite::Error) -> Self {
        TicketError::Database(e.to_string())
    }
}

/// Request to create a new ticket.
#[derive(Debug, Clone)]
pub struct CreateTicketRequest {
    /// User (or "system") submitting the ticket.
    pub creator: String,
    pub ticket_type: TicketType,
    /// Raw ticket parameters, validated by the scene for `ticket_type`.
    pub params: serde_json::Value,
}

/// A validated ticket ready to be persisted together with its flows.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub ticket_type: TicketType,
    pub creator: String,
    pub params: serde_json::Value,
    /// Flows in execution order; their index becomes the flow ordinal.
    pub flows: Vec<FlowPlan>,
}

/// Filter for querying tickets.
#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    /// Filter by status.
    pub status: Option<TicketStatus>,
    /// Filter by ticket type.
    pub ticket_type: Option<TicketType>,
    /// Filter by creator.
    pub creator: Option<String>,
    /// Only tickets created at or after this instant.
    pub created_after: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl TicketFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            status: None,
            ticket_type: None,
            creator: None,
            created_after: None,
            limit: 100,
            offset: 0,
        }
    }

    /// Filter by status.
    pub fn with_status(mut self, status: TicketStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filter by ticket type.
    pub fn with_ticket_type(mut self, ticket_type: TicketType) -> Self {
        self.ticket_type = Some(ticket_type);
        self
    }

    /// Filter by creator.
    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }

    /// Only tickets created at or after `since`.
    pub fn with_created_after(mut self, since: DateTime<Utc>) -> Self {
        self.created_after = Some(since);
        self
    }

    /// Return every match instead of one page.
    pub fn unpaged(mut self) -> Self {
        self.limit = -1;
        self.offset = 0;
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for ticket and flow storage backends.
pub trait TicketStore: Send + Sync {
    /// Persist a ticket and all of its flows atomically. Flows start PENDING.
    fn create(&self, ticket: NewTicket) -> Result<(Ticket, Vec<Flow>), TicketError>;

    /// Get a ticket by ID.
    fn get(&self, id: &str) -> Result<Option<Ticket>, TicketError>;

    /// List tickets matching the filter, newest first.
    fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, TicketError>;

    /// Count tickets matching the filter.
    fn count(&self, filter: &TicketFilter) -> Result<i64, TicketError>;

    /// Update a ticket's status. Terminal tickets cannot change.
    fn update_status(&self, id: &str, status: TicketStatus) -> Result<Ticket, TicketError>;

    /// Get a flow by ID.
    fn get_flow(&self, id: &str) -> Result<Option<Flow>, TicketError>;

    /// Get a flow by the root execution id handed to the pipeline.
    fn get_flow_by_root(&self, root_id: &str) -> Result<Option<Flow>, TicketError>;

    /// All flows of a ticket ordered by ordinal, then retry count.
    fn list_flows(&self, ticket_id: &str) -> Result<Vec<Flow>, TicketError>;

    /// Flows in `status`, optionally only those not updated since `updated_before`.
    fn list_flows_by_status(
        &self,
        status: FlowStatus,
        updated_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Flow>, TicketError>;

    /// Count flows in `status`.
    fn count_flows(&self, status: FlowStatus) -> Result<i64, TicketError>;

    /// Compare-and-set a flow's status. Returns `None` when the flow is no
    /// longer in `expected`, leaving the record untouched.
    fn transition_flow(
        &self,
        id: &str,
        expected: FlowStatus,
        update: FlowUpdate,
    ) -> Result<Option<Flow>, TicketError>;

    /// Append a PENDING flow to an existing ticket.
    fn add_flow(&self, flow: NewFlow) -> Result<Flow, TicketError>;

    /// Bump a flow's retry count and refresh its update time.
    fn increment_flow_retry(&self, id: &str) -> Result<Flow, TicketError>;
}
