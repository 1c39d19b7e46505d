//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Exclusivity coordination (admissions, queueing, promotions)
//! - Flow and ticket state machines
//! - Pipeline submissions
//! - Reconciliation passes

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Exclusivity
// =============================================================================

/// Exclusivity admission outcomes.
pub static FLOW_ADMISSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ticketflow_flow_admissions_total",
            "Exclusivity admission outcomes",
        ),
        &["result"], // "admitted", "queued", "promoted"
    )
    .unwrap()
});

// =============================================================================
// State machines
// =============================================================================

/// Flow status transitions.
pub static FLOW_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ticketflow_flow_transitions_total", "Flow status transitions"),
        &["from", "to"],
    )
    .unwrap()
});

/// Ticket status transitions.
pub static TICKET_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ticketflow_ticket_transitions_total",
            "Ticket status transitions",
        ),
        &["to"],
    )
    .unwrap()
});

/// Flow retries by reason.
pub static FLOW_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ticketflow_flow_retries_total", "Flow retries"),
        &["reason"], // "exclusive", "auto_retry"
    )
    .unwrap()
});

/// Pipeline updates rejected as inconsistent with stored state.
pub static INCONSISTENT_UPDATES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "ticketflow_inconsistent_updates_total",
        "Pipeline updates rejected as inconsistent",
    )
    .unwrap()
});

// =============================================================================
// Pipeline
// =============================================================================

/// Step graph submissions by ticket type and result.
pub static PIPELINE_SUBMISSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ticketflow_pipeline_submissions_total",
            "Step graph submissions",
        ),
        &["ticket_type", "result"], // "submitted", "failed", "invalid"
    )
    .unwrap()
});

// =============================================================================
// Reconciliation
// =============================================================================

/// Reconciliation passes by task and result.
pub static RECONCILE_PASSES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ticketflow_reconcile_passes_total",
            "Reconciliation passes",
        ),
        &["task", "result"],
    )
    .unwrap()
});

/// Reconciliation pass duration in seconds.
pub static RECONCILE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "ticketflow_reconcile_duration_seconds",
            "Duration of reconciliation passes",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
        &["task"],
    )
    .unwrap()
});

/// Data repair tickets created by the daily pass.
pub static REPAIR_TICKETS_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "ticketflow_repair_tickets_created_total",
        "Data repair tickets created automatically",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(FLOW_ADMISSIONS.clone()),
        Box::new(FLOW_TRANSITIONS.clone()),
        Box::new(TICKET_TRANSITIONS.clone()),
        Box::new(FLOW_RETRIES.clone()),
        Box::new(INCONSISTENT_UPDATES.clone()),
        Box::new(PIPELINE_SUBMISSIONS.clone()),
        Box::new(RECONCILE_PASSES.clone()),
        Box::new(RECONCILE_DURATION.clone()),
        Box::new(REPAIR_TICKETS_CREATED.clone()),
    ]
}
