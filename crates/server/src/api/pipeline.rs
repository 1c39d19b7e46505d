//! Pipeline runner callback handler.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;
use ticketflow_core::{CallbackOutcome, PipelineCallback};
use tracing::debug;

use super::tickets::{error_response, ApiError};
use crate::state::AppState;

/// Response to an accepted callback
#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub outcome: CallbackOutcome,
}

/// Apply a node or pipeline status report.
///
/// Duplicate and stale reports are acknowledged with 200 so the runner stops
/// redelivering them; conflicting reports get 409.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Json(report): Json<PipelineCallback>,
) -> Result<Json<CallbackResponse>, ApiError> {
    debug!(
        execution_id = %report.execution_id,
        node_id = %report.node_id,
        status = report.status.as_str(),
        "Pipeline callback received"
    );
    let outcome = state
        .manager()
        .apply_callback(report)
        .await
        .map_err(error_response)?;
    Ok(Json(CallbackResponse { outcome }))
}
