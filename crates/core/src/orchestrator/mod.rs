//! Ticket flow manager.
//!
//! Drives flows through admission, execution and completion, and keeps each
//! ticket's status consistent with its flows:
//! - **Admission**: through the [`ExclusivityCoordinator`](crate::exclusive::ExclusivityCoordinator)
//! - **Execution**: step graphs submitted by the [`SceneController`](crate::scene::SceneController)
//! - **Completion**: pipeline callbacks, revoke/terminate, stalled-flow re-drive

mod config;
mod manager;
mod redrive;
mod types;

pub use config::OrchestratorConfig;
pub use manager::{compute_ticket_status, is_retryable, TicketFlowManager, TicketUpdateCallback};
pub use types::{CallbackOutcome, FlowChange, OrchestratorError, OrchestratorStatus, RetryReport};
