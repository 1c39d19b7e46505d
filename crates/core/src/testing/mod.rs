//! Testing utilities and mock implementations.
//!
//! The pipeline runner is the only external collaborator of the engine, so a
//! [`MockPipelineRunner`] plus in-memory stores is enough to drive tickets end
//! to end without real infrastructure.
//!
//! # Example
//!
//! ```rust,ignore
//! use ticketflow_core::testing::{fixtures, MockPipelineRunner};
//!
//! let runner = Arc::new(MockPipelineRunner::new());
//! let manager = fixtures::manager(runner.clone(), OrchestratorConfig::default())?;
//!
//! let ticket = manager.create_ticket(fixtures::switch_request(&[42])).await?;
//! let running = runner.last_submission().unwrap();
//! manager.apply_callback(running.report(NodeStatus::Finished)).await?;
//! ```

mod mock_pipeline;

pub use mock_pipeline::{MockPipelineRunner, RecordedSubmission};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::sync::Arc;

    use serde_json::json;

    use super::MockPipelineRunner;
    use crate::exclusive::{ExclusivityCoordinator, InMemoryLockTable};
    use crate::orchestrator::{OrchestratorConfig, TicketFlowManager};
    use crate::scene::SceneController;
    use crate::ticket::{CreateTicketRequest, SqliteTicketStore, TicketError, TicketType};

    /// A flow manager over in-memory stores, submitting to `runner`.
    pub fn manager(
        runner: Arc<MockPipelineRunner>,
        config: OrchestratorConfig,
    ) -> Result<Arc<TicketFlowManager>, TicketError> {
        let store = SqliteTicketStore::in_memory()?;
        Ok(Arc::new(TicketFlowManager::new(
            config,
            Arc::new(store),
            Arc::new(ExclusivityCoordinator::new(Arc::new(InMemoryLockTable::new()))),
            SceneController::new(runner),
            None,
        )))
    }

    /// Master/slave switch of `cluster_ids`, one flow per cluster in order.
    pub fn switch_request(cluster_ids: &[u64]) -> CreateTicketRequest {
        CreateTicketRequest {
            creator: "alice".to_string(),
            ticket_type: TicketType::MysqlMasterSlaveSwitch,
            params: json!({
                "infos": [{
                    "cluster_ids": cluster_ids,
                    "master_ip": "10.0.0.1",
                    "slave_ip": "10.0.0.2",
                }]
            }),
        }
    }

    /// New HA clusters, one flow per domain.
    pub fn apply_request(domains: &[&str]) -> CreateTicketRequest {
        let clusters: Vec<_> = domains
            .iter()
            .enumerate()
            .map(|(i, name)| {
                json!({
                    "name": name,
                    "master_ip": format!("10.1.{}.1", i),
                    "slave_ip": format!("10.1.{}.2", i),
                })
            })
            .collect();
        CreateTicketRequest {
            creator: "bob".to_string(),
            ticket_type: TicketType::MysqlHaApply,
            params: json!({
                "bk_biz_id": 100,
                "db_version": "8.0",
                "clusters": clusters,
            }),
        }
    }

    /// Add one slave to `cluster_id`.
    pub fn add_slave_request(cluster_id: u64) -> CreateTicketRequest {
        CreateTicketRequest {
            creator: "carol".to_string(),
            ticket_type: TicketType::MysqlAddSlave,
            params: json!({
                "infos": [{
                    "cluster_id": cluster_id,
                    "master_ip": "10.0.0.1",
                    "new_slave_ip": "10.0.0.3",
                }]
            }),
        }
    }
}
