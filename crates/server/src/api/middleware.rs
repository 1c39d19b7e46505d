//! Request metrics middleware.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use prometheus::IntGauge;
use std::time::Instant;

use crate::metrics::{
    normalize_path, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION,
};

/// Holds one in-flight slot; released on drop, including when the client
/// goes away and the request future is cancelled.
struct InFlight(&'static IntGauge);

impl InFlight {
    fn enter(gauge: &'static IntGauge) -> Self {
        gauge.inc();
        Self(gauge)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Record duration, count and concurrency of every request, labelled by
/// method, normalized path and status.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().as_str().to_owned();
    let path = normalize_path(request.uri().path());
    let started = Instant::now();

    let response = {
        let _slot = InFlight::enter(&HTTP_REQUESTS_IN_FLIGHT);
        next.run(request).await
    };

    let status = response.status().as_u16().to_string();
    let labels = [method.as_str(), path.as_str(), status.as_str()];
    HTTP_REQUEST_DURATION
        .with_label_values(&labels)
        .observe(started.elapsed().as_secs_f64());
    HTTP_REQUESTS_TOTAL.with_label_values(&labels).inc();

    response
}
