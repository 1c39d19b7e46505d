//! Ticket API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use ticketflow_core::{
    CreateTicketRequest, Flow, FlowError, FlowStatus, OrchestratorError, Ticket, TicketFilter,
    TicketStatus, TicketType,
};

use crate::state::AppState;

/// Maximum allowed limit for ticket queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for ticket queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating a ticket
#[derive(Debug, Deserialize)]
pub struct CreateTicketBody {
    /// Submitting user
    pub creator: String,
    pub ticket_type: TicketType,
    /// Scene parameters, validated against `ticket_type`
    pub params: serde_json::Value,
}

/// Query parameters for listing tickets
#[derive(Debug, Deserialize)]
pub struct ListTicketsParams {
    /// Filter by status (e.g. `RUNNING`)
    pub status: Option<String>,
    /// Filter by ticket type (e.g. `MYSQL_ADD_SLAVE`)
    pub ticket_type: Option<String>,
    pub creator: Option<String>,
    /// Maximum number of tickets to return
    pub limit: Option<i64>,
    /// Pagination offset
    pub offset: Option<i64>,
}

/// Request body for revoking a ticket
#[derive(Debug, Deserialize)]
pub struct RevokeTicketBody {
    pub revoked_by: Option<String>,
    /// Optional reason for revocation
    pub reason: Option<String>,
}

/// Request body for terminating a ticket
#[derive(Debug, Deserialize)]
pub struct TerminateTicketBody {
    pub terminated_by: String,
    pub reason: String,
}

/// Response for ticket operations
#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub id: String,
    pub ticket_type: TicketType,
    pub creator: String,
    pub status: TicketStatus,
    pub scope: Vec<String>,
    pub params: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Ticket> for TicketResponse {
    fn from(ticket: Ticket) -> Self {
        Self {
            id: ticket.id,
            ticket_type: ticket.ticket_type,
            creator: ticket.creator,
            status: ticket.status,
            scope: ticket.scope.iter().map(|k| k.to_string()).collect(),
            params: ticket.params,
            created_at: ticket.created_at.to_rfc3339(),
            updated_at: ticket.updated_at.to_rfc3339(),
        }
    }
}

/// One flow in a ticket detail response
#[derive(Debug, Serialize)]
pub struct FlowResponse {
    pub id: String,
    pub ordinal: u32,
    pub flow_type: TicketType,
    pub root_id: String,
    pub status: FlowStatus,
    pub exclusive_key: String,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FlowError>,
    pub updated_at: String,
}

impl From<Flow> for FlowResponse {
    fn from(flow: Flow) -> Self {
        Self {
            id: flow.id,
            ordinal: flow.ordinal,
            flow_type: flow.flow_type,
            root_id: flow.root_id,
            status: flow.status,
            exclusive_key: flow.exclusive_key.to_string(),
            retry_count: flow.retry_count,
            retry_of: flow.retry_of,
            error: flow.error,
            updated_at: flow.updated_at.to_rfc3339(),
        }
    }
}

/// Ticket together with its flows
#[derive(Debug, Serialize)]
pub struct TicketDetailResponse {
    #[serde(flatten)]
    pub ticket: TicketResponse,
    pub flows: Vec<FlowResponse>,
}

/// Response for listing tickets
#[derive(Debug, Serialize)]
pub struct ListTicketsResponse {
    pub tickets: Vec<TicketResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct TicketErrorResponse {
    pub error: String,
}

pub(crate) type ApiError = (StatusCode, Json<TicketErrorResponse>);

fn bad_request(error: String) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(TicketErrorResponse { error }))
}

/// Map an engine error to its HTTP status.
pub(crate) fn error_response(e: OrchestratorError) -> ApiError {
    let status = match &e {
        OrchestratorError::Validation(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::TicketNotFound(_) | OrchestratorError::FlowNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        OrchestratorError::InvalidState { .. }
        | OrchestratorError::InconsistentState { .. }
        | OrchestratorError::ExclusivityTimeout { .. } => StatusCode::CONFLICT,
        OrchestratorError::PipelineExecution { .. } => StatusCode::BAD_GATEWAY,
        OrchestratorError::TicketStore(_) | OrchestratorError::Exclusive(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(TicketErrorResponse {
            error: e.to_string(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a ticket and start its first flow
pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTicketBody>,
) -> Result<(StatusCode, Json<TicketDetailResponse>), ApiError> {
    let request = CreateTicketRequest {
        creator: body.creator,
        ticket_type: body.ticket_type,
        params: body.params,
    };

    let ticket = state
        .manager()
        .create_ticket(request)
        .await
        .map_err(error_response)?;
    let flows = state.manager().flows(&ticket.id).map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(detail(ticket, flows))))
}

/// Get a ticket and its flows by ID
pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TicketDetailResponse>, ApiError> {
    let ticket = state.manager().ticket(&id).map_err(error_response)?;
    let flows = state.manager().flows(&id).map_err(error_response)?;
    Ok(Json(detail(ticket, flows)))
}

/// List tickets with optional filters
pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListTicketsParams>,
) -> Result<Json<ListTicketsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = TicketFilter::new().with_limit(limit).with_offset(offset);

    if let Some(ref status) = params.status {
        let status: TicketStatus = status.parse().map_err(bad_request)?;
        filter = filter.with_status(status);
    }
    if let Some(ref ticket_type) = params.ticket_type {
        let ticket_type: TicketType = ticket_type.parse().map_err(bad_request)?;
        filter = filter.with_ticket_type(ticket_type);
    }
    if let Some(ref creator) = params.creator {
        filter = filter.with_creator(creator);
    }

    let store = state.manager().store();
    let tickets = store
        .list(&filter)
        .map_err(|e| error_response(e.into()))?;

    // Total count ignores pagination
    let count_filter = TicketFilter {
        limit: i64::MAX,
        offset: 0,
        ..filter.clone()
    };
    let total = store
        .count(&count_filter)
        .map_err(|e| error_response(e.into()))?;

    Ok(Json(ListTicketsResponse {
        tickets: tickets.into_iter().map(TicketResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Revoke a ticket (DELETE endpoint)
pub async fn revoke_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<RevokeTicketBody>>,
) -> Result<Json<TicketResponse>, ApiError> {
    let (revoked_by, reason) = match body {
        Some(Json(body)) => (body.revoked_by, body.reason),
        None => (None, None),
    };
    let revoked_by = revoked_by.unwrap_or_else(|| "anonymous".to_string());

    let ticket = state
        .manager()
        .revoke_ticket(&id, &revoked_by, reason)
        .await
        .map_err(error_response)?;
    Ok(Json(TicketResponse::from(ticket)))
}

/// Terminate a running ticket on behalf of an operator
pub async fn terminate_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<TerminateTicketBody>,
) -> Result<Json<TicketResponse>, ApiError> {
    let ticket = state
        .manager()
        .terminate_ticket(&id, &body.terminated_by, &body.reason)
        .await
        .map_err(error_response)?;
    Ok(Json(TicketResponse::from(ticket)))
}

fn detail(ticket: Ticket, flows: Vec<Flow>) -> TicketDetailResponse {
    TicketDetailResponse {
        ticket: TicketResponse::from(ticket),
        flows: flows.into_iter().map(FlowResponse::from).collect(),
    }
}
