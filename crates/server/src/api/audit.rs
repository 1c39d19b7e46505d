//! Audit trail query handler.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use ticketflow_core::{AuditError, AuditFilter, AuditRecord};

use crate::state::AppState;

const MAX_LIMIT: i64 = 1000;
const DEFAULT_LIMIT: i64 = 100;

/// Query parameters for `GET /audit`
#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    pub ticket_id: Option<String>,
    /// Trail of a single flow attempt
    pub flow_id: Option<String>,
    /// Comma separated event types, e.g. `flow_admitted,flow_queued`
    pub event_type: Option<String>,
    /// Acting user or operator
    pub user_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditQueryParams {
    fn filter(&self) -> AuditFilter {
        let mut filter = AuditFilter::new().with_time_range(self.from, self.to);
        if let Some(ticket_id) = &self.ticket_id {
            filter = filter.with_ticket_id(ticket_id);
        }
        if let Some(flow_id) = &self.flow_id {
            filter = filter.with_flow_id(flow_id);
        }
        if let Some(user_id) = &self.user_id {
            filter = filter.with_user_id(user_id);
        }
        for event_type in self
            .event_type
            .iter()
            .flat_map(|types| types.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            filter = filter.with_event_type(event_type);
        }
        filter
    }
}

#[derive(Debug, Serialize)]
pub struct AuditQueryResponse {
    pub events: Vec<AuditRecord>,
    /// Matching events across all pages
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct AuditErrorResponse {
    pub error: String,
}

fn store_error(e: AuditError) -> (StatusCode, Json<AuditErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(AuditErrorResponse {
            error: format!("Failed to read audit trail: {}", e),
        }),
    )
}

/// Query audit events, newest first
pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditQueryResponse>, (StatusCode, Json<AuditErrorResponse>)> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);
    let filter = params.filter().with_page(limit, offset);

    let store = state.audit_store();
    let events = store.query(&filter).map_err(store_error)?;
    let total = store.count(&filter.unpaged()).map_err(store_error)?;

    Ok(Json(AuditQueryResponse {
        events,
        total,
        limit,
        offset,
    }))
}
