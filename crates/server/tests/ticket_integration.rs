//! Ticket API integration tests.

mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};

use common::TestFixture;

fn switch_body(cluster_ids: &[u64]) -> Value {
    json!({
        "creator": "alice",
        "ticket_type": "MYSQL_MASTER_SLAVE_SWITCH",
        "params": {
            "infos": [{
                "cluster_ids": cluster_ids,
                "master_ip": "10.0.0.1",
                "slave_ip": "10.0.0.2",
            }]
        }
    })
}

#[tokio::test]
async fn test_create_ticket_starts_first_flow() {
    let fixture = TestFixture::new().await;

    let response = fixture.post("/api/v1/tickets", switch_body(&[1, 2])).await;

    assert_status!(response, StatusCode::CREATED);
    assert_eq!(response.body["status"], "RUNNING");
    assert_eq!(response.body["creator"], "alice");
    assert_eq!(response.body["scope"], json!(["cluster-1", "cluster-2"]));
    let flows = response.body["flows"].as_array().unwrap();
    assert_eq!(flows.len(), 2);
    assert_eq!(flows[0]["status"], "RUNNING");
    assert_eq!(flows[1]["status"], "PENDING");
    assert_eq!(fixture.runner.submissions().len(), 1);
}

#[tokio::test]
async fn test_create_ticket_with_invalid_params_is_rejected() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/tickets",
            json!({
                "creator": "alice",
                "ticket_type": "MYSQL_ADD_SLAVE",
                "params": {"infos": []},
            }),
        )
        .await;

    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(response.body["error"].is_string());
    assert!(fixture.runner.submissions().is_empty());

    let list = fixture.get("/api/v1/tickets").await;
    assert_eq!(list.body["total"], 0);
}

#[tokio::test]
async fn test_create_ticket_with_unknown_type_is_rejected() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/tickets",
            json!({"creator": "alice", "ticket_type": "REDIS_APPLY", "params": {}}),
        )
        .await;

    assert!(response.status.is_client_error());
}

#[tokio::test]
async fn test_get_ticket() {
    let fixture = TestFixture::new().await;
    let created = fixture.post("/api/v1/tickets", switch_body(&[3])).await;
    let id = created.body["id"].as_str().unwrap();

    let response = fixture.get(&format!("/api/v1/tickets/{}", id)).await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["id"], id);
    assert_eq!(response.body["flows"][0]["exclusive_key"], "cluster-3");
}

#[tokio::test]
async fn test_get_unknown_ticket_returns_404() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/tickets/does-not-exist").await;

    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_tickets_with_filters() {
    let fixture = TestFixture::new().await;
    fixture.post("/api/v1/tickets", switch_body(&[1])).await;
    fixture.post("/api/v1/tickets", switch_body(&[2])).await;
    fixture
        .post(
            "/api/v1/tickets",
            json!({
                "creator": "carol",
                "ticket_type": "MYSQL_ADD_SLAVE",
                "params": {"infos": [{
                    "cluster_id": 3,
                    "master_ip": "10.0.0.1",
                    "new_slave_ip": "10.0.0.3",
                }]},
            }),
        )
        .await;

    let all = fixture.get("/api/v1/tickets").await;
    assert_eq!(all.body["total"], 3);

    let by_type = fixture
        .get("/api/v1/tickets?ticket_type=MYSQL_ADD_SLAVE")
        .await;
    assert_eq!(by_type.body["total"], 1);
    assert_eq!(by_type.body["tickets"][0]["creator"], "carol");

    let by_creator = fixture.get("/api/v1/tickets?creator=alice&limit=1").await;
    assert_eq!(by_creator.body["total"], 2);
    assert_eq!(by_creator.body["tickets"].as_array().unwrap().len(), 1);

    let bad = fixture.get("/api/v1/tickets?status=DONE").await;
    assert_status!(bad, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_revoke_ticket() {
    let fixture = TestFixture::new().await;
    let created = fixture.post("/api/v1/tickets", switch_body(&[4])).await;
    let id = created.body["id"].as_str().unwrap();

    let response = fixture
        .delete_with_body(
            &format!("/api/v1/tickets/{}", id),
            json!({"revoked_by": "alice", "reason": "wrong cluster"}),
        )
        .await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "REVOKED");

    let detail = fixture.get(&format!("/api/v1/tickets/{}", id)).await;
    assert_eq!(detail.body["flows"][0]["status"], "REVOKED");

    let again = fixture.delete(&format!("/api/v1/tickets/{}", id)).await;
    assert_status!(again, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_revoke_unknown_ticket_returns_404() {
    let fixture = TestFixture::new().await;

    let response = fixture.delete("/api/v1/tickets/does-not-exist").await;

    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_terminate_ticket() {
    let fixture = TestFixture::new().await;
    let created = fixture.post("/api/v1/tickets", switch_body(&[5, 6])).await;
    let id = created.body["id"].as_str().unwrap();

    let response = fixture
        .post(
            &format!("/api/v1/tickets/{}/terminate", id),
            json!({"terminated_by": "ops", "reason": "change freeze"}),
        )
        .await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "TERMINATED");

    let status = fixture.get("/api/v1/status").await;
    assert_eq!(status.body["held_keys"], 0);
    assert_eq!(status.body["tickets"]["TERMINATED"], 1);
}

#[tokio::test]
async fn test_queued_ticket_starts_after_holder_finishes() {
    let fixture = TestFixture::new().await;
    let first = fixture.post("/api/v1/tickets", switch_body(&[42])).await;
    let second = fixture.post("/api/v1/tickets", switch_body(&[42])).await;
    assert_eq!(second.body["flows"][0]["status"], "PENDING");

    let root = first.body["flows"][0]["root_id"].as_str().unwrap();
    let callback = fixture
        .post(
            "/api/v1/pipeline/callback",
            json!({"execution_id": root, "node_id": root, "status": "FINISHED"}),
        )
        .await;
    assert_status!(callback, StatusCode::OK);

    let id = second.body["id"].as_str().unwrap();
    let detail = fixture.get(&format!("/api/v1/tickets/{}", id)).await;
    assert_eq!(detail.body["flows"][0]["status"], "RUNNING");
}
