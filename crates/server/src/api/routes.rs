use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{audit, handlers, middleware::metrics_middleware, orchestrator, pipeline, tickets};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Engine status
        .route("/status", get(orchestrator::get_status))
        // Audit
        .route("/audit", get(audit::query_audit))
        // Tickets
        .route("/tickets", post(tickets::create_ticket))
        .route("/tickets", get(tickets::list_tickets))
        .route("/tickets/{id}", get(tickets::get_ticket))
        .route("/tickets/{id}", delete(tickets::revoke_ticket))
        .route("/tickets/{id}/terminate", post(tickets::terminate_ticket))
        // Pipeline runner callbacks
        .route("/pipeline/callback", post(pipeline::callback))
        // Reconciliation
        .route("/reconcile/{task}", post(orchestrator::run_task))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::get_metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
