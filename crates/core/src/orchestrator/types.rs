//! Types for the ticket flow manager.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exclusive::ExclusiveError;
use crate::scene::ValidationError;
use crate::ticket::{FlowStatus, TicketError};

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Ticket parameters rejected before any flow was created.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A step graph failed or could not be submitted.
    #[error("pipeline execution failed for flow {flow_id}: {detail}")]
    PipelineExecution { flow_id: String, detail: String },

    /// A flow spent its exclusivity wait budget.
    #[error("flow {flow_id} timed out waiting for {exclusive_key} after {retry_count} retries")]
    ExclusivityTimeout {
        flow_id: String,
        exclusive_key: String,
        retry_count: u32,
    },

    /// A reported transition violates the flow state machine.
    #[error("inconsistent update for flow {flow_id}: {current} -> {reported}")]
    InconsistentState {
        flow_id: String,
        current: FlowStatus,
        reported: FlowStatus,
    },

    /// Ticket not found.
    #[error("ticket not found: {0}")]
    TicketNotFound(String),

    /// No flow with this id or pipeline execution id.
    #[error("flow not found: {0}")]
    FlowNotFound(String),

    /// Invalid ticket state for operation.
    #[error("ticket {ticket_id} is {current}, cannot {operation}")]
    InvalidState {
        ticket_id: String,
        current: String,
        operation: String,
    },

    /// Ticket store error.
    #[error("ticket store error: {0}")]
    TicketStore(#[from] TicketError),

    /// Exclusivity lock table error.
    #[error("exclusivity error: {0}")]
    Exclusive(#[from] ExclusiveError),
}

/// A persisted flow status change, consumed by the flow manager.
///
/// `flow_id` is `None` for a flow that has not been stored yet; such changes
/// are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowChange {
    pub flow_id: Option<String>,
    pub ticket_id: String,
    pub from: FlowStatus,
    pub to: FlowStatus,
}

/// How a pipeline callback was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    /// The flow moved to a new status.
    Applied,
    /// Intermediate node report; nothing to persist.
    Progress,
    /// The flow already had the reported status.
    Duplicate,
    /// Late report for a flow that was revoked meanwhile.
    Stale,
}

/// Current status of the flow manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Ticket counts keyed by status.
    pub tickets: BTreeMap<String, i64>,
    /// Flow counts keyed by status.
    pub flows: BTreeMap<String, i64>,
    /// Exclusivity keys currently held by a flow.
    pub held_keys: usize,
    /// Flows waiting in any exclusivity queue.
    pub waiting_flows: usize,
}

/// Outcome of one stalled-flow re-drive pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryReport {
    /// Stalled PENDING flows looked at.
    pub examined: usize,
    /// Flows whose admission was requested again.
    pub retried: usize,
    /// Flows admitted and started during this pass.
    pub started: usize,
    /// Flows failed with an exclusivity timeout.
    pub timed_out: usize,
    /// Flows of terminal tickets moved to SKIPPED.
    pub skipped: usize,
    /// Locks whose holder was terminal or missing.
    pub repaired_locks: usize,
}

impl RetryReport {
    /// Number of flows whose state this pass changed.
    pub fn changed(&self) -> usize {
        self.retried + self.timed_out + self.skipped
    }
}
