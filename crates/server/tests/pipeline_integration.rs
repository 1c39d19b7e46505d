//! Pipeline callback API integration tests.

mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};
use ticketflow_core::{OrchestratorConfig, TicketType};

use common::TestFixture;

async fn running_root(fixture: &TestFixture, cluster_id: u64) -> (String, String) {
    let created = fixture
        .post(
            "/api/v1/tickets",
            json!({
                "creator": "alice",
                "ticket_type": "MYSQL_MASTER_FAIL_OVER",
                "params": {"infos": [{
                    "cluster_ids": [cluster_id],
                    "master_ip": "10.0.0.1",
                    "slave_ip": "10.0.0.2",
                }]},
            }),
        )
        .await;
    let id = created.body["id"].as_str().unwrap().to_string();
    let root = created.body["flows"][0]["root_id"].as_str().unwrap().to_string();
    (id, root)
}

fn report(execution_id: &str, node_id: &str, status: &str, payload: Value) -> Value {
    json!({
        "execution_id": execution_id,
        "node_id": node_id,
        "status": status,
        "payload": payload,
    })
}

#[tokio::test]
async fn test_finished_callback_finishes_ticket() {
    let fixture = TestFixture::new().await;
    let (id, root) = running_root(&fixture, 1).await;

    let response = fixture
        .post(
            "/api/v1/pipeline/callback",
            report(&root, &root, "FINISHED", json!({"new_master_ip": "10.0.0.2"})),
        )
        .await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["outcome"], "applied");
    let ticket = fixture.get(&format!("/api/v1/tickets/{}", id)).await;
    assert_eq!(ticket.body["status"], "FINISHED");
}

#[tokio::test]
async fn test_node_progress_is_acknowledged() {
    let fixture = TestFixture::new().await;
    let (id, root) = running_root(&fixture, 2).await;
    let node = fixture.runner.last_submission().unwrap().graph.nodes[0].id.clone();

    let response = fixture
        .post(
            "/api/v1/pipeline/callback",
            report(&root, &node, "FINISHED", Value::Null),
        )
        .await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["outcome"], "progress");
    let ticket = fixture.get(&format!("/api/v1/tickets/{}", id)).await;
    assert_eq!(ticket.body["status"], "RUNNING");
}

#[tokio::test]
async fn test_node_failure_terminates_ticket() {
    let fixture = TestFixture::new().await;
    let (id, root) = running_root(&fixture, 3).await;
    let node = fixture.runner.last_submission().unwrap().graph.nodes[0].id.clone();

    let response = fixture
        .post(
            "/api/v1/pipeline/callback",
            report(&root, &node, "FAILED", json!({"error": "replication lag too high"})),
        )
        .await;

    assert_status!(response, StatusCode::OK);
    let ticket = fixture.get(&format!("/api/v1/tickets/{}", id)).await;
    assert_eq!(ticket.body["status"], "TERMINATED");
    let error = &ticket.body["flows"][0]["error"];
    assert_eq!(error["kind"], "pipeline_execution");
    assert_eq!(error["node_id"], node.as_str());
    assert_eq!(error["detail"], "replication lag too high");
}

#[tokio::test]
async fn test_duplicate_callback_is_idempotent() {
    let fixture = TestFixture::new().await;
    let (_, root) = running_root(&fixture, 4).await;
    let body = report(&root, &root, "FINISHED", Value::Null);

    fixture.post("/api/v1/pipeline/callback", body.clone()).await;
    let again = fixture.post("/api/v1/pipeline/callback", body).await;

    assert_status!(again, StatusCode::OK);
    assert_eq!(again.body["outcome"], "duplicate");
}

#[tokio::test]
async fn test_conflicting_callback_is_rejected() {
    let fixture = TestFixture::new().await;
    let (id, root) = running_root(&fixture, 5).await;

    fixture
        .post(
            "/api/v1/pipeline/callback",
            report(&root, &root, "FINISHED", Value::Null),
        )
        .await;
    let conflict = fixture
        .post(
            "/api/v1/pipeline/callback",
            report(&root, &root, "FAILED", Value::Null),
        )
        .await;

    assert_status!(conflict, StatusCode::CONFLICT);
    let ticket = fixture.get(&format!("/api/v1/tickets/{}", id)).await;
    assert_eq!(ticket.body["status"], "FINISHED");
    assert_eq!(fixture.wait_for_audit("inconsistent_update_rejected", 1).await, 1);
}

#[tokio::test]
async fn test_callback_for_unknown_execution_returns_404() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/pipeline/callback",
            report("nope", "nope", "FINISHED", Value::Null),
        )
        .await;

    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_flow_is_continued_when_type_auto_retries() {
    let fixture = TestFixture::with_orchestrator(OrchestratorConfig {
        auto_retry_ticket_types: vec![TicketType::MysqlMasterFailOver],
        ..OrchestratorConfig::default()
    })
    .await;
    let (id, root) = running_root(&fixture, 6).await;

    fixture
        .post(
            "/api/v1/pipeline/callback",
            report(&root, &root, "FAILED", json!("switch aborted")),
        )
        .await;

    let ticket = fixture.get(&format!("/api/v1/tickets/{}", id)).await;
    assert_eq!(ticket.body["status"], "RUNNING");
    let flows = ticket.body["flows"].as_array().unwrap();
    assert_eq!(flows.len(), 2);
    assert_eq!(flows[1]["retry_of"], flows[0]["id"]);
    assert_eq!(flows[1]["status"], "RUNNING");
    assert_eq!(fixture.runner.submissions().len(), 2);
}
