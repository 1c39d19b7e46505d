//! Flow data types and the flow state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::exclusive::ExclusiveKey;

use super::TicketType;

/// Execution status of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Revoked,
}

impl FlowStatus {
    pub const ALL: [FlowStatus; 6] = [
        FlowStatus::Pending,
        FlowStatus::Running,
        FlowStatus::Succeeded,
        FlowStatus::Failed,
        FlowStatus::Skipped,
        FlowStatus::Revoked,
    ];

    pub fn is_terminal(&self) -> bool {
        !matches!(self, FlowStatus::Pending | FlowStatus::Running)
    }

    /// Whether the flow counts as done for advancing its ticket.
    pub fn is_complete(&self) -> bool {
        matches!(self, FlowStatus::Succeeded | FlowStatus::Skipped)
    }

    /// Allowed edges of the flow state machine.
    pub fn can_transition_to(&self, next: FlowStatus) -> bool {
        use FlowStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Skipped)
                | (Pending, Revoked)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Revoked)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStatus::Pending => "PENDING",
            FlowStatus::Running => "RUNNING",
            FlowStatus::Succeeded => "SUCCEEDED",
            FlowStatus::Failed => "FAILED",
            FlowStatus::Skipped => "SKIPPED",
            FlowStatus::Revoked => "REVOKED",
        }
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FlowStatus::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown flow status: {}", s))
    }
}

/// Category of a flow failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowErrorKind {
    /// Flow context failed scene validation.
    Validation,
    /// A step graph node failed, or the graph could not be submitted.
    PipelineExecution,
    /// The flow exhausted its exclusivity wait budget.
    ExclusivityTimeout,
}

/// Diagnostic attached to a failed flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowError {
    pub kind: FlowErrorKind,
    /// Failing step graph node, when the failure came from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub detail: String,
}

impl FlowError {
    pub fn new(kind: FlowErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            node_id: None,
            detail: detail.into(),
        }
    }

    pub fn at_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }
}

/// What a scene needs to create one flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowPlan {
    pub flow_type: TicketType,
    /// Per-flow slice of the ticket parameters handed to the scene builder.
    pub context: serde_json::Value,
    pub exclusive_key: ExclusiveKey,
}

/// A continuation flow added to an existing ticket.
#[derive(Debug, Clone)]
pub struct NewFlow {
    pub ticket_id: String,
    pub ordinal: u32,
    pub plan: FlowPlan,
    pub retry_count: u32,
    pub retry_of: Option<String>,
}

/// One execution unit of a ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub ticket_id: String,
    /// Position within the ticket. Continuations share their predecessor's ordinal.
    pub ordinal: u32,
    pub flow_type: TicketType,
    /// Root execution id handed to the pipeline runner.
    pub root_id: String,
    pub context: serde_json::Value,
    pub status: FlowStatus,
    pub exclusive_key: ExclusiveKey,
    pub retry_count: u32,
    /// Failed flow this one continues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FlowError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    /// Keep only the newest attempt for each ordinal, ordered by ordinal.
    pub fn latest_attempts(flows: &[Flow]) -> Vec<&Flow> {
        let mut latest: Vec<&Flow> = Vec::new();
        for flow in flows {
            match latest.iter_mut().find(|f| f.ordinal == flow.ordinal) {
                Some(slot) if slot.retry_count < flow.retry_count => *slot = flow,
                Some(_) => {}
                None => latest.push(flow),
            }
        }
        latest.sort_by_key(|f| f.ordinal);
        latest
    }
}

/// A status change applied to a flow record.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowUpdate {
    pub status: FlowStatus,
    pub error: Option<FlowError>,
    /// Replaces the flow context when set.
    pub context: Option<serde_json::Value>,
}

impl FlowUpdate {
    pub fn status(status: FlowStatus) -> Self {
        Self {
            status,
            error: None,
            context: None,
        }
    }

    pub fn with_error(mut self, error: FlowError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}
