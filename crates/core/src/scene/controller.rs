//! Turns a flow into a submitted step graph.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metrics::PIPELINE_SUBMISSIONS;
use crate::pipeline::{PipelineError, PipelineRunner, RunHandle};
use crate::ticket::TicketType;

use super::graph::StepGraph;
use super::params::ValidationError;
use super::{data_repair, mysql_apply, mysql_slave, mysql_switch, tendbcluster_switch};

#[derive(Debug, Error)]
pub enum SceneError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Pipeline submission failed: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Build the step graph for one flow of `ticket_type`.
pub fn build_graph(
    ticket_type: TicketType,
    root_id: &str,
    context: &serde_json::Value,
) -> Result<StepGraph, ValidationError> {
    match ticket_type {
        TicketType::MysqlHaApply => mysql_apply::build(root_id, context),
        TicketType::MysqlMasterSlaveSwitch => mysql_switch::build_master_slave_switch(root_id, context),
        TicketType::MysqlMasterFailOver => mysql_switch::build_master_fail_over(root_id, context),
        TicketType::TendbclusterMasterSlaveSwitch => {
            tendbcluster_switch::build_master_slave_switch(root_id, context)
        }
        TicketType::TendbclusterMasterFailOver => {
            tendbcluster_switch::build_master_fail_over(root_id, context)
        }
        TicketType::MysqlAddSlave => mysql_slave::build_add(root_id, context),
        TicketType::MysqlReduceSlave => mysql_slave::build_reduce(root_id, context),
        TicketType::MysqlDataRepair => data_repair::build(root_id, context),
    }
}

/// Scene controller: validates flow data, builds its graph and submits it.
///
/// Errors are reported to the caller; nothing is retried here.
pub struct SceneController {
    runner: Arc<dyn PipelineRunner>,
}

impl SceneController {
    pub fn new(runner: Arc<dyn PipelineRunner>) -> Self {
        Self { runner }
    }

    pub fn runner_name(&self) -> &str {
        self.runner.name()
    }

    pub async fn build_and_run(
        &self,
        root_id: &str,
        ticket_type: TicketType,
        data: &serde_json::Value,
    ) -> Result<RunHandle, SceneError> {
        let graph = build_graph(ticket_type, root_id, data).inspect_err(|e| {
            warn!(root_id = %root_id, ticket_type = %ticket_type, error = %e, "Flow data rejected");
            PIPELINE_SUBMISSIONS
                .with_label_values(&[ticket_type.as_str(), "invalid"])
                .inc();
        })?;

        debug!(root_id = %root_id, nodes = graph.nodes.len(), edges = graph.edges.len(), "Built step graph");

        match self.runner.submit(&graph, data).await {
            Ok(handle) => {
                PIPELINE_SUBMISSIONS
                    .with_label_values(&[ticket_type.as_str(), "submitted"])
                    .inc();
                info!(
                    root_id = %root_id,
                    ticket_type = %ticket_type,
                    runner = %self.runner.name(),
                    "Submitted step graph"
                );
                Ok(handle)
            }
            Err(e) => {
                PIPELINE_SUBMISSIONS
                    .with_label_values(&[ticket_type.as_str(), "failed"])
                    .inc();
                warn!(root_id = %root_id, ticket_type = %ticket_type, error = %e, "Pipeline submission failed");
                Err(e.into())
            }
        }
    }
}
