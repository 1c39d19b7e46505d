//! Prometheus metrics for the daemon.
//!
//! Combines the HTTP request metrics recorded by the middleware, gauges
//! collected from the flow manager on every scrape, and the engine collectors
//! exported by `ticketflow_core::metrics`.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use regex_lite::Regex;
use ticketflow_core::{FlowStatus, TicketStatus};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "ticketflow_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ticketflow_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "ticketflow_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Engine state (collected dynamically)
// =============================================================================

/// Tickets by current status.
pub static TICKETS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("ticketflow_tickets_by_status", "Current ticket count by status"),
        &["status"],
    )
    .unwrap()
});

/// Flows by current status.
pub static FLOWS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("ticketflow_flows_by_status", "Current flow count by status"),
        &["status"],
    )
    .unwrap()
});

/// Exclusivity keys currently held.
pub static HELD_KEYS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "ticketflow_exclusive_keys_held",
        "Number of exclusivity keys held by a running flow",
    )
    .unwrap()
});

/// Flows waiting in an exclusivity queue.
pub static WAITING_FLOWS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "ticketflow_exclusive_waiting_flows",
        "Number of flows queued behind an exclusivity key",
    )
    .unwrap()
});

/// Scheduler running state (1 = running, 0 = stopped).
pub static SCHEDULER_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "ticketflow_scheduler_running",
        "Whether the reconciliation scheduler is running (1) or stopped (0)",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Engine state
    registry
        .register(Box::new(TICKETS_BY_STATUS.clone()))
        .unwrap();
    registry
        .register(Box::new(FLOWS_BY_STATUS.clone()))
        .unwrap();
    registry.register(Box::new(HELD_KEYS.clone())).unwrap();
    registry.register(Box::new(WAITING_FLOWS.clone())).unwrap();
    registry
        .register(Box::new(SCHEDULER_RUNNING.clone()))
        .unwrap();

    // Core metrics (admissions, transitions, reconciliation)
    for metric in ticketflow_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Refresh the state gauges from the flow manager before a scrape.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    SCHEDULER_RUNNING.set(if state.scheduler().is_running() { 1 } else { 0 });

    match state.manager().status() {
        Ok(status) => {
            for ticket_status in TicketStatus::ALL {
                let label = ticket_status.as_str();
                let count = status.tickets.get(label).copied().unwrap_or(0);
                TICKETS_BY_STATUS.with_label_values(&[label]).set(count);
            }
            for flow_status in FlowStatus::ALL {
                let label = flow_status.as_str();
                let count = status.flows.get(label).copied().unwrap_or(0);
                FLOWS_BY_STATUS.with_label_values(&[label]).set(count);
            }
            HELD_KEYS.set(status.held_keys as i64);
            WAITING_FLOWS.set(status.waiting_flows as i64);
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to collect engine status for metrics");
        }
    }
}

static UUID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});

static NUMERIC_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());

/// Normalize a path for metric labels (ticket ids and cluster ids become `{id}`).
pub fn normalize_path(path: &str) -> String {
    let result = UUID_SEGMENT.replace_all(path, "{id}");
    let result = NUMERIC_SEGMENT.replace_all(&result, "/{id}$1");
    result.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/v1/tickets/550e8400-e29b-41d4-a716-446655440000/revoke";
        assert_eq!(normalize_path(path), "/api/v1/tickets/{id}/revoke");
    }

    #[test]
    fn test_normalize_path_numeric() {
        let path = "/api/v1/clusters/12345";
        assert_eq!(normalize_path(path), "/api/v1/clusters/{id}");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/v1/health"), "/api/v1/health");
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = encode_metrics();
        assert!(output.contains("ticketflow_http_requests_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_registry_contains_engine_metrics() {
        TICKETS_BY_STATUS.with_label_values(&["RUNNING"]).set(0);
        FLOWS_BY_STATUS.with_label_values(&["PENDING"]).set(0);
        HELD_KEYS.set(0);
        SCHEDULER_RUNNING.set(0);
        ticketflow_core::metrics::FLOW_ADMISSIONS
            .with_label_values(&["admitted"])
            .inc();

        let output = encode_metrics();

        assert!(output.contains("ticketflow_tickets_by_status"));
        assert!(output.contains("ticketflow_flows_by_status"));
        assert!(output.contains("ticketflow_exclusive_keys_held"));
        assert!(output.contains("ticketflow_scheduler_running"));
        assert!(output.contains("ticketflow_flow_admissions_total"));
    }
}
