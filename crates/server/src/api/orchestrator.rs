//! Engine status and manual reconciliation handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use ticketflow_core::reconcile::Task;

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

/// Engine status response
#[derive(Debug, Serialize)]
pub struct EngineStatusResponse {
    /// Whether the reconciliation scheduler loops are running
    pub scheduler_running: bool,
    /// Ticket counts keyed by status
    pub tickets: BTreeMap<String, i64>,
    /// Flow counts keyed by status
    pub flows: BTreeMap<String, i64>,
    /// Exclusivity keys currently held
    pub held_keys: usize,
    /// Flows queued behind a held key
    pub waiting_flows: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct EngineErrorResponse {
    pub error: String,
}

/// Simple message response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get engine status
pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<EngineStatusResponse>, impl IntoResponse> {
    match state.manager().status() {
        Ok(status) => Ok(Json(EngineStatusResponse {
            scheduler_running: state.scheduler().is_running(),
            tickets: status.tickets,
            flows: status.flows,
            held_keys: status.held_keys,
            waiting_flows: status.waiting_flows,
        })),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(EngineErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}

/// Run one reconciliation task now, outside its schedule
pub async fn run_task(
    State(state): State<Arc<AppState>>,
    Path(task): Path<String>,
) -> Result<Json<MessageResponse>, impl IntoResponse> {
    let task = match task.as_str() {
        "exclusive_retry" => Task::ExclusiveRetry,
        "data_repair" => Task::DataRepair,
        other => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(EngineErrorResponse {
                    error: format!("Unknown reconciliation task: {}", other),
                }),
            ));
        }
    };

    match state.scheduler().run_once(task).await {
        Ok(()) => Ok(Json(MessageResponse {
            message: format!("{} completed", task.name()),
        })),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(EngineErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}
