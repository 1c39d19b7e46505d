//! Ticket lifecycle integration tests.
//!
//! These tests drive tickets through the flow manager end to end, with a mock
//! pipeline standing in for the execution engine:
//! created -> flows admitted in order -> pipeline reports -> terminal status

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use ticketflow_core::{
    create_audit_system,
    orchestrator::compute_ticket_status,
    testing::{fixtures, MockPipelineRunner},
    Admission, AuditFilter, AuditStore, CallbackOutcome, ExclusiveKey, ExclusivityCoordinator,
    FlowErrorKind, FlowStatus, NodeStatus, OrchestratorConfig, OrchestratorError, SceneController,
    SqliteAuditStore, SqliteLockTable, SqliteTicketStore, TicketFlowManager, TicketStatus,
    TicketType,
};

/// Test helper wiring a manager over SQLite stores in a temp directory.
struct TestHarness {
    runner: Arc<MockPipelineRunner>,
    manager: Arc<TicketFlowManager>,
    audit_store: Arc<SqliteAuditStore>,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    fn with_config(config: OrchestratorConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let store = SqliteTicketStore::new(&db_path).expect("Failed to create ticket store");
        let locks = SqliteLockTable::new(&db_path).expect("Failed to create lock table");
        let audit_store =
            Arc::new(SqliteAuditStore::new(&db_path).expect("Failed to create audit store"));

        let (audit, writer) = create_audit_system(audit_store.clone(), 256);
        tokio::spawn(writer.run());

        let runner = Arc::new(MockPipelineRunner::new());
        let manager = Arc::new(TicketFlowManager::new(
            config,
            Arc::new(store),
            Arc::new(ExclusivityCoordinator::new(Arc::new(locks))),
            SceneController::new(runner.clone()),
            Some(audit),
        ));

        Self {
            runner,
            manager,
            audit_store,
            _temp_dir: temp_dir,
        }
    }

    /// Report the overall outcome of the flow currently running on `root_id`.
    async fn finish(&self, root_id: &str, status: NodeStatus) -> CallbackOutcome {
        let submission = self
            .runner
            .submissions()
            .into_iter()
            .find(|s| s.graph.root_id == root_id)
            .expect("no submission for root");
        self.manager
            .apply_callback(submission.report(status))
            .await
            .expect("callback rejected")
    }

    fn flow_statuses(&self, ticket_id: &str) -> Vec<FlowStatus> {
        self.manager
            .flows(ticket_id)
            .unwrap()
            .iter()
            .map(|f| f.status)
            .collect()
    }

    /// Wait for the audit writer to persist at least `count` events of `event_type`.
    async fn wait_for_audit(&self, event_type: &str, count: i64) -> i64 {
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
}

#[tokio::test]
async fn test_ordered_flows_run_one_after_another() {
    let h = TestHarness::new();
    let ticket = h
        .manager
        .create_ticket(fixtures::switch_request(&[1, 2, 3]))
        .await
        .unwrap();

    assert_eq!(ticket.status, TicketStatus::Running);
    assert_eq!(
        h.flow_statuses(&ticket.id),
        vec![FlowStatus::Running, FlowStatus::Pending, FlowStatus::Pending]
    );

    let flows = h.manager.flows(&ticket.id).unwrap();
    for (i, flow) in flows.iter().enumerate() {
        assert_eq!(h.runner.submissions().len(), i + 1);
        assert_eq!(h.finish(&flow.root_id, NodeStatus::Finished).await, CallbackOutcome::Applied);
    }

    assert_eq!(
        h.flow_statuses(&ticket.id),
        vec![FlowStatus::Succeeded; 3]
    );
    assert_eq!(h.manager.ticket(&ticket.id).unwrap().status, TicketStatus::Finished);
    assert!(h.manager.coordinator().entries().unwrap().is_empty());
}

#[tokio::test]
async fn test_second_flow_waits_until_first_succeeds() {
    let h = TestHarness::new();
    let ticket = h
        .manager
        .create_ticket(fixtures::switch_request(&[1, 2]))
        .await
        .unwrap();
    let flows = h.manager.flows(&ticket.id).unwrap();

    // Progress on the first flow does not release the second.
    let running = h.runner.last_submission().unwrap();
    let outcome = h
        .manager
        .apply_callback(running.node_report(0, NodeStatus::Finished))
        .await
        .unwrap();
    assert_eq!(outcome, CallbackOutcome::Progress);
    assert_eq!(h.flow_statuses(&ticket.id)[1], FlowStatus::Pending);
    assert_eq!(h.runner.submissions_for(&flows[1].root_id), 0);

    h.finish(&flows[0].root_id, NodeStatus::Finished).await;
    assert_eq!(h.flow_statuses(&ticket.id)[1], FlowStatus::Running);
    assert_eq!(h.runner.submissions_for(&flows[1].root_id), 1);
}

#[tokio::test]
async fn test_same_key_flows_are_admitted_in_arrival_order() {
    let h = TestHarness::new();
    let key = ExclusiveKey::cluster(42);

    let a = h.manager.create_ticket(fixtures::switch_request(&[42])).await.unwrap();
    let b = h.manager.create_ticket(fixtures::add_slave_request(42)).await.unwrap();
    let c = h.manager.create_ticket(fixtures::switch_request(&[42])).await.unwrap();

    let flow_a = h.manager.flows(&a.id).unwrap().remove(0);
    let flow_b = h.manager.flows(&b.id).unwrap().remove(0);
    let flow_c = h.manager.flows(&c.id).unwrap().remove(0);

    assert_eq!(flow_a.status, FlowStatus::Running);
    assert_eq!(flow_b.status, FlowStatus::Pending);
    assert_eq!(flow_c.status, FlowStatus::Pending);
    let entry = h.manager.coordinator().entry(&key).unwrap();
    assert_eq!(entry.holder.as_deref(), Some(flow_a.id.as_str()));
    assert_eq!(entry.waiting, vec![flow_b.id.clone(), flow_c.id.clone()]);
    assert_eq!(h.runner.submissions().len(), 1);

    h.finish(&flow_a.root_id, NodeStatus::Finished).await;
    assert_eq!(h.flow_statuses(&b.id), vec![FlowStatus::Running]);
    assert_eq!(h.flow_statuses(&c.id), vec![FlowStatus::Pending]);
    assert_eq!(
        h.manager.coordinator().holder(&key).unwrap().as_deref(),
        Some(flow_b.id.as_str())
    );

    h.finish(&flow_b.root_id, NodeStatus::Finished).await;
    assert_eq!(h.flow_statuses(&c.id), vec![FlowStatus::Running]);

    h.finish(&flow_c.root_id, NodeStatus::Finished).await;
    assert!(h.manager.coordinator().entry(&key).unwrap().is_vacant());
    for id in [&a.id, &b.id, &c.id] {
        assert_eq!(h.manager.ticket(id).unwrap().status, TicketStatus::Finished);
    }
}

#[tokio::test]
async fn test_at_most_one_running_flow_per_key() {
    let h = TestHarness::new();
    let mut tickets = Vec::new();
    for _ in 0..5 {
        tickets.push(h.manager.create_ticket(fixtures::switch_request(&[7])).await.unwrap());
    }

    loop {
        let running: Vec<_> = tickets
            .iter()
            .flat_map(|t| h.manager.flows(&t.id).unwrap())
            .filter(|f| f.status == FlowStatus::Running)
            .collect();
        assert!(running.len() <= 1, "two flows running on one key");
        let Some(flow) = running.first() else {
            break;
        };
        h.finish(&flow.root_id, NodeStatus::Finished).await;
    }

    assert_eq!(h.runner.submissions().len(), 5);
    for t in &tickets {
        assert_eq!(h.manager.ticket(&t.id).unwrap().status, TicketStatus::Finished);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_running_flow_per_key_while_redriving() {
    let h = Arc::new(TestHarness::with_config(OrchestratorConfig {
        max_retry_count: 100_000,
        exclusive_wait_threshold_secs: 0,
        ..OrchestratorConfig::default()
    }));
    let key = ExclusiveKey::cluster(8);
    let mut tickets = Vec::new();
    for _ in 0..6 {
        tickets.push(h.manager.create_ticket(fixtures::switch_request(&[8])).await.unwrap());
    }

    // Re-drive the waiters in a loop while callbacks promote them.
    let stop = Arc::new(AtomicBool::new(false));
    let redriver = {
        let manager = h.manager.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            while !stop.load(Ordering::Relaxed) {
                manager.retry_stalled_flows().await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let mut finished = 0;
    for _ in 0..5_000 {
        let running: Vec<_> = tickets
            .iter()
            .flat_map(|t| h.manager.flows(&t.id).unwrap())
            .filter(|f| f.status == FlowStatus::Running)
            .collect();
        assert!(running.len() <= 1, "two flows running on {}", key);

        match running.first() {
            // Marked RUNNING just before submission; wait for the runner to see it.
            Some(flow) if h.runner.submissions_for(&flow.root_id) == 0 => {
                tokio::time::sleep(Duration::from_millis(1)).await
            }
            Some(flow) => {
                assert_eq!(h.finish(&flow.root_id, NodeStatus::Finished).await, CallbackOutcome::Applied);
                finished += 1;
                if finished == tickets.len() {
                    break;
                }
            }
            None => tokio::time::sleep(Duration::from_millis(1)).await,
        }
    }

    stop.store(true, Ordering::Relaxed);
    assert_ok!(redriver.await);

    assert_eq!(finished, tickets.len());
    for t in &tickets {
        assert_eq!(h.manager.ticket(&t.id).unwrap().status, TicketStatus::Finished);
        let flow = h.manager.flows(&t.id).unwrap().remove(0);
        assert_eq!(h.runner.submissions_for(&flow.root_id), 1);
    }
    assert!(h.manager.coordinator().entry(&key).unwrap().is_vacant());
}

#[tokio::test]
async fn test_pipeline_failure_terminates_ticket() {
    let h = TestHarness::new();
    let ticket = h
        .manager
        .create_ticket(fixtures::switch_request(&[1, 2]))
        .await
        .unwrap();
    let flows = h.manager.flows(&ticket.id).unwrap();

    h.finish(&flows[0].root_id, NodeStatus::Failed).await;

    let ticket = h.manager.ticket(&ticket.id).unwrap();
    assert_eq!(ticket.status, TicketStatus::Terminated);
    let flows = h.manager.flows(&ticket.id).unwrap();
    assert_eq!(flows[0].status, FlowStatus::Failed);
    assert_eq!(
        flows[0].error.as_ref().unwrap().kind,
        FlowErrorKind::PipelineExecution
    );
    assert_eq!(flows[1].status, FlowStatus::Skipped);
    assert_eq!(h.runner.submissions().len(), 1);
    assert!(h.manager.coordinator().entries().unwrap().is_empty());
}

#[tokio::test]
async fn test_failure_hands_key_to_other_ticket() {
    let h = TestHarness::new();
    let a = h.manager.create_ticket(fixtures::switch_request(&[5])).await.unwrap();
    let b = h.manager.create_ticket(fixtures::switch_request(&[5])).await.unwrap();
    let flow_a = h.manager.flows(&a.id).unwrap().remove(0);

    h.finish(&flow_a.root_id, NodeStatus::Failed).await;

    assert_eq!(h.manager.ticket(&a.id).unwrap().status, TicketStatus::Terminated);
    assert_eq!(h.flow_statuses(&b.id), vec![FlowStatus::Running]);
    assert_eq!(h.runner.submissions().len(), 2);
}

#[tokio::test]
async fn test_revoke_while_queued_admits_next_waiter() {
    let h = TestHarness::new();
    let key = ExclusiveKey::cluster(42);
    let a = h.manager.create_ticket(fixtures::switch_request(&[42])).await.unwrap();
    let b = h.manager.create_ticket(fixtures::switch_request(&[42])).await.unwrap();
    let c = h.manager.create_ticket(fixtures::switch_request(&[42])).await.unwrap();
    let flow_a = h.manager.flows(&a.id).unwrap().remove(0);
    let flow_c = h.manager.flows(&c.id).unwrap().remove(0);

    let revoked = h
        .manager
        .revoke_ticket(&b.id, "alice", Some("wrong cluster".to_string()))
        .await
        .unwrap();

    assert_eq!(revoked.status, TicketStatus::Revoked);
    assert_eq!(h.flow_statuses(&b.id), vec![FlowStatus::Revoked]);
    assert_eq!(
        h.manager.coordinator().entry(&key).unwrap().waiting,
        vec![flow_c.id.clone()]
    );

    h.finish(&flow_a.root_id, NodeStatus::Finished).await;
    assert_eq!(h.flow_statuses(&c.id), vec![FlowStatus::Running]);
    assert_eq!(h.runner.submissions_for(&flow_c.root_id), 1);
}

#[tokio::test]
async fn test_revoke_running_ticket_releases_key() {
    let h = TestHarness::new();
    let a = h.manager.create_ticket(fixtures::switch_request(&[3])).await.unwrap();
    let b = h.manager.create_ticket(fixtures::switch_request(&[3])).await.unwrap();
    let flow_a = h.manager.flows(&a.id).unwrap().remove(0);

    h.manager.revoke_ticket(&a.id, "alice", None).await.unwrap();

    assert_eq!(h.flow_statuses(&a.id), vec![FlowStatus::Revoked]);
    assert_eq!(h.flow_statuses(&b.id), vec![FlowStatus::Running]);

    // The pipeline may still report on the revoked flow; it is ignored.
    let outcome = h.finish(&flow_a.root_id, NodeStatus::Finished).await;
    assert_eq!(outcome, CallbackOutcome::Stale);
    assert_eq!(h.manager.ticket(&a.id).unwrap().status, TicketStatus::Revoked);
}

#[tokio::test]
async fn test_terminate_skips_remaining_work() {
    let h = TestHarness::new();
    let ticket = h
        .manager
        .create_ticket(fixtures::switch_request(&[1, 2]))
        .await
        .unwrap();

    let terminated = h
        .manager
        .terminate_ticket(&ticket.id, "ops", "maintenance window closed")
        .await
        .unwrap();

    assert_eq!(terminated.status, TicketStatus::Terminated);
    assert_eq!(
        h.flow_statuses(&ticket.id),
        vec![FlowStatus::Revoked, FlowStatus::Revoked]
    );

    let err = assert_err!(h.manager.revoke_ticket(&ticket.id, "alice", None).await);
    assert!(matches!(err, OrchestratorError::InvalidState { .. }));
}

#[tokio::test]
async fn test_terminal_status_is_absorbing() {
    let h = TestHarness::new();
    let ticket = h.manager.create_ticket(fixtures::switch_request(&[9])).await.unwrap();
    let flow = h.manager.flows(&ticket.id).unwrap().remove(0);
    h.finish(&flow.root_id, NodeStatus::Finished).await;

    let submission = h.runner.last_submission().unwrap();
    let outcome = assert_ok!(
        h.manager
            .apply_callback(submission.report(NodeStatus::Finished))
            .await
    );
    assert_eq!(outcome, CallbackOutcome::Duplicate);
    let err = assert_err!(
        h.manager
            .apply_callback(submission.report(NodeStatus::Failed))
            .await
    );
    assert!(matches!(err, OrchestratorError::InconsistentState { .. }));

    let flows = h.manager.flows(&ticket.id).unwrap();
    assert_eq!(flows[0].status, FlowStatus::Succeeded);
    assert_eq!(
        compute_ticket_status(TicketStatus::Finished, &flows, h.manager.config()),
        TicketStatus::Finished
    );
    assert_eq!(h.manager.ticket(&ticket.id).unwrap().status, TicketStatus::Finished);
    assert_eq!(h.wait_for_audit("inconsistent_update_rejected", 1).await, 1);
}

#[tokio::test]
async fn test_auto_retry_continues_failed_flow() {
    let h = TestHarness::with_config(OrchestratorConfig {
        max_retry_count: 2,
        auto_retry_ticket_types: vec![TicketType::MysqlMasterSlaveSwitch],
        ..OrchestratorConfig::default()
    });
    let ticket = h.manager.create_ticket(fixtures::switch_request(&[4])).await.unwrap();
    let first = h.manager.flows(&ticket.id).unwrap().remove(0);

    h.finish(&first.root_id, NodeStatus::Failed).await;

    let flows = h.manager.flows(&ticket.id).unwrap();
    assert_eq!(flows.len(), 2);
    let continuation = &flows[1];
    assert_eq!(continuation.retry_of.as_deref(), Some(first.id.as_str()));
    assert_eq!(continuation.retry_count, 1);
    assert_eq!(continuation.status, FlowStatus::Running);
    assert_eq!(h.manager.ticket(&ticket.id).unwrap().status, TicketStatus::Running);

    h.finish(&continuation.root_id, NodeStatus::Finished).await;
    assert_eq!(h.manager.ticket(&ticket.id).unwrap().status, TicketStatus::Finished);
    assert_eq!(h.wait_for_audit("flow_retried", 1).await, 1);
}

#[tokio::test]
async fn test_auto_retry_stops_at_budget() {
    let h = TestHarness::with_config(OrchestratorConfig {
        max_retry_count: 1,
        auto_retry_ticket_types: vec![TicketType::MysqlMasterSlaveSwitch],
        ..OrchestratorConfig::default()
    });
    let ticket = h.manager.create_ticket(fixtures::switch_request(&[4])).await.unwrap();

    let first = h.manager.flows(&ticket.id).unwrap().remove(0);
    h.finish(&first.root_id, NodeStatus::Failed).await;
    let second = h.manager.flows(&ticket.id).unwrap().remove(1);
    h.finish(&second.root_id, NodeStatus::Failed).await;

    assert_eq!(h.manager.flows(&ticket.id).unwrap().len(), 2);
    assert_eq!(h.manager.ticket(&ticket.id).unwrap().status, TicketStatus::Terminated);
}

#[tokio::test]
async fn test_audit_trail_records_lifecycle() {
    let h = TestHarness::new();
    let ticket = h.manager.create_ticket(fixtures::switch_request(&[8])).await.unwrap();
    let flow = h.manager.flows(&ticket.id).unwrap().remove(0);
    h.finish(&flow.root_id, NodeStatus::Finished).await;

    assert_eq!(h.wait_for_audit("ticket_created", 1).await, 1);
    assert_eq!(h.wait_for_audit("flow_admitted", 1).await, 1);
    assert!(h.wait_for_audit("ticket_status_changed", 1).await >= 1);

    let records = h
        .audit_store
        .query(&AuditFilter::new().with_ticket_id(ticket.id.as_str()))
        .unwrap();
    assert!(records.iter().all(|r| r.ticket_id.as_deref() == Some(ticket.id.as_str())));
}

#[tokio::test]
async fn test_state_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("restart.db");
    let runner = Arc::new(MockPipelineRunner::new());

    let build = |runner: Arc<MockPipelineRunner>| {
        TicketFlowManager::new(
            OrchestratorConfig::default(),
            Arc::new(SqliteTicketStore::new(&db_path).unwrap()),
            Arc::new(ExclusivityCoordinator::new(Arc::new(
                SqliteLockTable::new(&db_path).unwrap(),
            ))),
            SceneController::new(runner),
            None,
        )
    };

    let (a, b) = {
        let manager = build(runner.clone());
        let a = manager.create_ticket(fixtures::switch_request(&[6])).await.unwrap();
        let b = manager.create_ticket(fixtures::switch_request(&[6])).await.unwrap();
        (a, b)
    };

    let manager = build(runner.clone());
    let flow_b = manager.flows(&b.id).unwrap().remove(0);
    assert_eq!(
        manager
            .coordinator()
            .acquire(&ExclusiveKey::cluster(6), &flow_b.id)
            .unwrap(),
        Admission::Queued { position: 0 }
    );

    let submission = runner.last_submission().unwrap();
    manager
        .apply_callback(submission.report(NodeStatus::Finished))
        .await
        .unwrap();

    assert_eq!(manager.ticket(&a.id).unwrap().status, TicketStatus::Finished);
    assert_eq!(manager.flows(&b.id).unwrap()[0].status, FlowStatus::Running);
}

#[tokio::test]
async fn test_status_snapshot_counts() {
    let h = TestHarness::new();
    h.manager.create_ticket(fixtures::switch_request(&[1])).await.unwrap();
    h.manager.create_ticket(fixtures::switch_request(&[1])).await.unwrap();
    h.manager.create_ticket(fixtures::apply_request(&["db1.example"])).await.unwrap();

    let status = h.manager.status().unwrap();
    assert_eq!(status.tickets.get("RUNNING"), Some(&3));
    assert_eq!(status.flows.get("RUNNING"), Some(&2));
    assert_eq!(status.flows.get("PENDING"), Some(&1));
    assert_eq!(status.held_keys, 2);
    assert_eq!(status.waiting_flows, 1);
}
