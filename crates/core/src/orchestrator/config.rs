//! Ticket flow manager configuration.

use serde::{Deserialize, Serialize};

use crate::ticket::TicketType;

/// Configuration for the ticket flow manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Retry budget per flow, shared by exclusivity re-admission and auto-retry.
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,

    /// A PENDING flow idle this long is re-driven by the scheduler (seconds).
    #[serde(default = "default_exclusive_wait_threshold")]
    pub exclusive_wait_threshold_secs: u64,

    /// Ticket types whose failed flows are retried with a continuation flow.
    /// Other types terminate the ticket on the first failure.
    #[serde(default)]
    pub auto_retry_ticket_types: Vec<TicketType>,
}

fn default_max_retry_count() -> u32 {
    6
}

fn default_exclusive_wait_threshold() -> u64 {
    600 // 10 minutes
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retry_count: default_max_retry_count(),
            exclusive_wait_threshold_secs: default_exclusive_wait_threshold(),
            auto_retry_ticket_types: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn auto_retries(&self, ticket_type: TicketType) -> bool {
        self.auto_retry_ticket_types.contains(&ticket_type)
    }
}
