//! Common test utilities for in-process API testing.
//!
//! Builds the router over SQLite stores in a temp directory, with a
//! [`MockPipelineRunner`] standing in for the execution engine.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use ticketflow_core::{
    create_audit_system, AuditFilter, AuditStore, Config, DatabaseConfig, ExclusivityCoordinator,
    OrchestratorConfig, Reconciler, ReconciliationScheduler, SceneController, SchedulerConfig,
    SqliteAuditStore, SqliteChecksumReports, SqliteLockTable, SqliteTicketStore,
    TicketFlowManager,
};

pub use ticketflow_core::testing::{fixtures, MockPipelineRunner};

/// In-process server with a controllable pipeline runner.
pub struct TestFixture {
    pub router: Router,
    pub runner: Arc<MockPipelineRunner>,
    pub manager: Arc<TicketFlowManager>,
    pub checksum_reports: Arc<SqliteChecksumReports>,
    pub audit_store: Arc<SqliteAuditStore>,
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_orchestrator(OrchestratorConfig::default()).await
    }

    pub async fn with_orchestrator(orchestrator: OrchestratorConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let config = Config {
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            orchestrator: orchestrator.clone(),
            scheduler: SchedulerConfig::default(),
            ..Config::default()
        };

        let audit_store =
            Arc::new(SqliteAuditStore::new(&db_path).expect("Failed to create audit store"));
        let (audit_handle, audit_writer) =
            create_audit_system(audit_store.clone() as Arc<dyn AuditStore>, 100);
        tokio::spawn(audit_writer.run());

        let runner = Arc::new(MockPipelineRunner::new());
        let manager = Arc::new(TicketFlowManager::new(
            orchestrator,
            Arc::new(SqliteTicketStore::new(&db_path).expect("Failed to create ticket store")),
            Arc::new(ExclusivityCoordinator::new(Arc::new(
                SqliteLockTable::new(&db_path).expect("Failed to create lock table"),
            ))),
            SceneController::new(runner.clone()),
            Some(audit_handle.clone()),
        ));

        let checksum_reports = Arc::new(
            SqliteChecksumReports::new(&db_path).expect("Failed to create checksum reports"),
        );
        let reconciler = Arc::new(Reconciler::new(
            manager.clone(),
            checksum_reports.clone(),
            config.scheduler.clone(),
            Some(audit_handle.clone()),
        ));
        // Never started: tests trigger passes through the API.
        let scheduler = Arc::new(ReconciliationScheduler::new(&config.scheduler, reconciler));

        let state = Arc::new(ticketflow_server::state::AppState::new(
            config,
            manager.clone(),
            scheduler,
            audit_handle,
            audit_store.clone(),
        ));
        let router = ticketflow_server::api::create_router(state);

        Self {
            router,
            runner,
            manager,
            checksum_reports,
            audit_store,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a DELETE request with JSON body.
    pub async fn delete_with_body(&self, path: &str, body: Value) -> TestResponse {
        self.request("DELETE", path, Some(body)).await
    }

    /// GET a non-JSON endpoint, returning the raw text.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    /// Wait until the audit writer has stored `count` events of `event_type`.
    pub async fn wait_for_audit(&self, event_type: &str, count: i64) -> i64 {
        let filter = AuditFilter::new().with_event_type(event_type);
        for _ in 0..50 {
            let found = self.audit_store.count(&filter).unwrap();
            if found >= count {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.audit_store.count(&filter).unwrap()
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
