//! Re-driving flows stuck waiting for their exclusivity key.

use std::collections::VecDeque;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::audit::AuditEvent;
use crate::metrics;
use crate::ticket::{Flow, FlowError, FlowErrorKind, FlowStatus, FlowUpdate};

use super::manager::{predecessors_complete, TicketFlowManager, Work};
use super::types::{OrchestratorError, RetryReport};

impl TicketFlowManager {
    /// Retry admission of PENDING flows idle for longer than the configured
    /// threshold.
    ///
    /// Running flows are never touched, and a flow that moved on since the
    /// scan is left alone, so repeated passes do not submit anything twice.
    pub async fn retry_stalled_flows(&self) -> Result<RetryReport, OrchestratorError> {
        let threshold = Duration::seconds(self.config.exclusive_wait_threshold_secs as i64);
        let stalled = self
            .store
            .list_flows_by_status(FlowStatus::Pending, Some(Utc::now() - threshold))?;

        let mut report = RetryReport::default();
        let mut queue = VecDeque::new();
        for flow in stalled {
            report.examined += 1;
            if let Err(e) = self.redrive_flow(&flow.id, &mut report, &mut queue).await {
                warn!(flow_id = %flow.id, error = %e, "Failed to re-drive flow");
            }
        }
        self.run_queue(queue).await;

        if report.examined > 0 {
            info!(
                examined = report.examined,
                retried = report.retried,
                started = report.started,
                timed_out = report.timed_out,
                skipped = report.skipped,
                "Re-drove stalled flows"
            );
        }
        Ok(report)
    }

    async fn redrive_flow(
        &self,
        flow_id: &str,
        report: &mut RetryReport,
        queue: &mut VecDeque<Work>,
    ) -> Result<(), OrchestratorError> {
        let Some(flow) = self.store.get_flow(flow_id)? else {
            return Ok(());
        };
        if flow.status != FlowStatus::Pending {
            debug!(flow_id = %flow.id, status = %flow.status, "Flow progressed since scan");
            return Ok(());
        }

        let ticket = self.ticket(&flow.ticket_id)?;
        if ticket.status.is_terminal() {
            if let Some(skipped) = self
                .transition(&flow, FlowUpdate::status(FlowStatus::Skipped))
                .await?
            {
                report.skipped += 1;
                queue.push_back(Work::changed(&skipped, FlowStatus::Pending));
            }
            return Ok(());
        }

        let flows = self.store.list_flows(&ticket.id)?;
        if !predecessors_complete(&flows, flow.ordinal) {
            debug!(flow_id = %flow.id, "Flow not yet eligible");
            return Ok(());
        }

        if flow.retry_count >= self.config.max_retry_count {
            let err = OrchestratorError::ExclusivityTimeout {
                flow_id: flow.id.clone(),
                exclusive_key: flow.exclusive_key.to_string(),
                retry_count: flow.retry_count,
            };
            warn!(ticket_id = %flow.ticket_id, "{}", err);

            let update = FlowUpdate::status(FlowStatus::Failed).with_error(FlowError::new(
                FlowErrorKind::ExclusivityTimeout,
                err.to_string(),
            ));
            if let Some(failed) = self.transition(&flow, update).await? {
                report.timed_out += 1;
                queue.push_back(Work::changed(&failed, FlowStatus::Pending));
            }
            return Ok(());
        }

        let flow = self.store.increment_flow_retry(&flow.id)?;
        report.retried += 1;
        metrics::FLOW_RETRIES.with_label_values(&["exclusive"]).inc();
        info!(
            ticket_id = %flow.ticket_id,
            flow_id = %flow.id,
            retry_count = flow.retry_count,
            exclusive_key = %flow.exclusive_key,
            "Retrying admission of stalled flow"
        );
        self.emit(AuditEvent::FlowRetried {
            ticket_id: flow.ticket_id.clone(),
            flow_id: flow.id.clone(),
            retry_count: flow.retry_count,
            reason: "exclusive".to_string(),
            new_flow_id: None,
        })
        .await;

        if self.repair_lock(&flow, queue)? {
            report.repaired_locks += 1;
        }
        if self.start_flow(&flow.id, queue).await? {
            report.started += 1;
        }
        Ok(())
    }

    /// Release the key of `flow` from a holder that is finished or gone.
    fn repair_lock(&self, flow: &Flow, queue: &mut VecDeque<Work>) -> Result<bool, OrchestratorError> {
        let entry = self.coordinator.entry(&flow.exclusive_key)?;
        let Some(holder) = entry.holder else {
            return Ok(false);
        };
        if holder == flow.id {
            return Ok(false);
        }

        let stale = match self.store.get_flow(&holder)? {
            Some(h) => h.status.is_terminal(),
            None => true,
        };
        if !stale {
            return Ok(false);
        }

        warn!(
            exclusive_key = %flow.exclusive_key,
            holder = %holder,
            "Releasing key held by a finished flow"
        );
        if let Some(next) = self.coordinator.release(&flow.exclusive_key, &holder)? {
            if next != flow.id {
                queue.push_back(Work::Start(next));
            }
        }
        Ok(true)
    }
}
