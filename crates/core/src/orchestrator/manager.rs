//! Ticket flow manager implementation.
//!
//! Keeps every ticket's status a function of its flows:
//! - Flows of one ticket run one at a time, in ordinal order
//! - A flow only runs while it holds its exclusivity key
//! - Every persisted flow transition is fed back as a [`FlowChange`], which
//!   releases keys, spawns retries, recomputes the ticket and advances it

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::exclusive::{Admission, ExclusivityCoordinator};
use crate::metrics;
use crate::pipeline::{NodeStatus, PipelineCallback};
use crate::scene::{plan_flows, SceneController, SceneError};
use crate::ticket::{
    CreateTicketRequest, Flow, FlowError, FlowErrorKind, FlowPlan, FlowStatus, FlowUpdate,
    NewFlow, NewTicket, Ticket, TicketFilter, TicketStatus, TicketStore,
};

use super::config::OrchestratorConfig;
use super::types::{CallbackOutcome, FlowChange, OrchestratorError, OrchestratorStatus};

/// Callback invoked whenever a ticket changes status.
pub type TicketUpdateCallback = Arc<dyn Fn(&str, TicketStatus) + Send + Sync>;

/// Pending follow-up work. Processing one item may enqueue more.
#[derive(Debug)]
pub(super) enum Work {
    /// Try to admit and start a PENDING flow.
    Start(String),
    /// React to a persisted flow transition.
    Changed(FlowChange),
}

impl Work {
    pub(super) fn changed(flow: &Flow, from: FlowStatus) -> Self {
        Work::Changed(FlowChange {
            flow_id: Some(flow.id.clone()),
            ticket_id: flow.ticket_id.clone(),
            from,
            to: flow.status,
        })
    }
}

/// Whether a failed flow gets a continuation instead of terminating its ticket.
pub fn is_retryable(flow: &Flow, config: &OrchestratorConfig) -> bool {
    flow.status == FlowStatus::Failed
        && config.auto_retries(flow.flow_type)
        && flow.retry_count < config.max_retry_count
        && flow
            .error
            .as_ref()
            .is_some_and(|e| e.kind == FlowErrorKind::PipelineExecution)
}

/// Ticket status implied by its flows.
///
/// Terminal statuses are returned unchanged. Only the newest attempt of each
/// ordinal counts.
pub fn compute_ticket_status(
    current: TicketStatus,
    flows: &[Flow],
    config: &OrchestratorConfig,
) -> TicketStatus {
    if current.is_terminal() {
        return current;
    }

    let latest = Flow::latest_attempts(flows);
    if latest.is_empty() {
        return current;
    }

    let fatal = latest.iter().any(|f| match f.status {
        FlowStatus::Failed => !is_retryable(f, config),
        FlowStatus::Revoked => true,
        _ => false,
    });
    if fatal {
        TicketStatus::Terminated
    } else if latest.iter().all(|f| f.status.is_complete()) {
        TicketStatus::Finished
    } else {
        TicketStatus::Running
    }
}

/// Whether every ordinal before `ordinal` is done.
pub(super) fn predecessors_complete(flows: &[Flow], ordinal: u32) -> bool {
    Flow::latest_attempts(flows)
        .iter()
        .filter(|f| f.ordinal < ordinal)
        .all(|f| f.status.is_complete())
}

/// The ticket flow manager: drives flows and keeps ticket status consistent.
pub struct TicketFlowManager {
    pub(super) config: OrchestratorConfig,
    pub(super) store: Arc<dyn TicketStore>,
    pub(super) coordinator: Arc<ExclusivityCoordinator>,
    controller: SceneController,
    audit: Option<AuditHandle>,
    update_callback: Option<TicketUpdateCallback>,
    /// Serializes read-compute-write of ticket status.
    status_lock: Mutex<()>,
}

impl TicketFlowManager {
    /// Create a new flow manager.
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn TicketStore>,
        coordinator: Arc<ExclusivityCoordinator>,
        controller: SceneController,
        audit: Option<AuditHandle>,
    ) -> Self {
        Self {
            config,
            store,
            coordinator,
            controller,
            audit,
            update_callback: None,
            status_lock: Mutex::new(()),
        }
    }

    /// Set a callback invoked on every ticket status change.
    pub fn with_update_callback(mut self, callback: TicketUpdateCallback) -> Self {
        self.update_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TicketStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<ExclusivityCoordinator> {
        &self.coordinator
    }

    /// Get a ticket by ID.
    pub fn ticket(&self, id: &str) -> Result<Ticket, OrchestratorError> {
        self.store
            .get(id)?
            .ok_or_else(|| OrchestratorError::TicketNotFound(id.to_string()))
    }

    /// All flow attempts of a ticket, ordered by ordinal.
    pub fn flows(&self, ticket_id: &str) -> Result<Vec<Flow>, OrchestratorError> {
        Ok(self.store.list_flows(ticket_id)?)
    }

    /// Validate, persist and start a ticket.
    ///
    /// Invalid parameters are rejected before anything is stored. The first
    /// flow is submitted for admission right away.
    pub async fn create_ticket(
        &self,
        request: CreateTicketRequest,
    ) -> Result<Ticket, OrchestratorError> {
        let plans = plan_flows(request.ticket_type, &request.params).inspect_err(|e| {
            warn!(ticket_type = %request.ticket_type, creator = %request.creator, error = %e, "Ticket rejected");
        })?;

        let (ticket, flows) = self.store.create(NewTicket {
            ticket_type: request.ticket_type,
            creator: request.creator,
            params: request.params,
            flows: plans,
        })?;

        info!(
            ticket_id = %ticket.id,
            ticket_type = %ticket.ticket_type,
            flows = flows.len(),
            "Created ticket"
        );
        metrics::TICKET_TRANSITIONS
            .with_label_values(&[TicketStatus::Running.as_str()])
            .inc();
        self.emit(AuditEvent::TicketCreated {
            ticket_id: ticket.id.clone(),
            ticket_type: ticket.ticket_type.to_string(),
            creator: ticket.creator.clone(),
            flow_count: flows.len(),
        })
        .await;
        self.notify(&ticket.id, ticket.status);

        if let Some(first) = flows.first() {
            self.drive(Work::Start(first.id.clone())).await;
        }

        self.ticket(&ticket.id)
    }

    /// React to a persisted flow transition.
    ///
    /// Changes without a flow identity come from records that are still being
    /// created and are ignored.
    pub async fn flow_changed(&self, change: FlowChange) {
        if change.flow_id.is_none() {
            debug!(ticket_id = %change.ticket_id, "Ignoring change of an unsaved flow");
            return;
        }
        self.drive(Work::Changed(change)).await;
    }

    /// Apply a status report from the pipeline runner.
    ///
    /// Duplicate and out-of-order reports are tolerated; reports that would
    /// break the flow state machine are rejected.
    pub async fn apply_callback(
        &self,
        callback: PipelineCallback,
    ) -> Result<CallbackOutcome, OrchestratorError> {
        let flow = self
            .store
            .get_flow_by_root(&callback.execution_id)?
            .ok_or_else(|| OrchestratorError::FlowNotFound(callback.execution_id.clone()))?;

        let update = match (callback.is_overall(), callback.status) {
            (_, NodeStatus::Running) | (false, NodeStatus::Finished) | (false, NodeStatus::Revoked) => {
                return self.progress(&flow, &callback).await;
            }
            (false, NodeStatus::Failed) => FlowUpdate::status(FlowStatus::Failed).with_error(
                FlowError::new(FlowErrorKind::PipelineExecution, callback.detail())
                    .at_node(&callback.node_id),
            ),
            (true, NodeStatus::Failed) => FlowUpdate::status(FlowStatus::Failed).with_error(
                FlowError::new(FlowErrorKind::PipelineExecution, callback.detail()),
            ),
            (true, NodeStatus::Finished) => {
                let update = FlowUpdate::status(FlowStatus::Succeeded);
                match merge_context(&flow.context, &callback.payload) {
                    Some(context) => update.with_context(context),
                    None => update,
                }
            }
            (true, NodeStatus::Revoked) => FlowUpdate::status(FlowStatus::Revoked),
        };

        let reported = update.status;
        if flow.status == reported {
            debug!(flow_id = %flow.id, status = %reported, "Duplicate pipeline report");
            return Ok(CallbackOutcome::Duplicate);
        }
        if flow.status == FlowStatus::Revoked {
            debug!(flow_id = %flow.id, reported = %reported, "Late pipeline report for revoked flow");
            return Ok(CallbackOutcome::Stale);
        }
        // Node reports may trail the overall result; only the overall one is binding.
        if !callback.is_overall() && flow.status.is_terminal() {
            debug!(flow_id = %flow.id, node_id = %callback.node_id, status = %flow.status, "Late node report");
            return Ok(CallbackOutcome::Stale);
        }
        if flow.status != FlowStatus::Running {
            return Err(self.reject(&flow, &callback, reported).await);
        }

        if let Some(failure) = &update.error {
            let err = OrchestratorError::PipelineExecution {
                flow_id: flow.id.clone(),
                detail: failure.detail.clone(),
            };
            warn!(ticket_id = %flow.ticket_id, node_id = ?failure.node_id, "{}", err);
        }

        match self.transition(&flow, update).await? {
            Some(updated) => {
                self.drive(Work::changed(&updated, flow.status)).await;
                Ok(CallbackOutcome::Applied)
            }
            None => {
                // Lost a race with another writer; classify against the winner.
                let current = self
                    .store
                    .get_flow(&flow.id)?
                    .ok_or_else(|| OrchestratorError::FlowNotFound(flow.id.clone()))?;
                if current.status == reported {
                    Ok(CallbackOutcome::Duplicate)
                } else if current.status == FlowStatus::Revoked
                    || (!callback.is_overall() && current.status.is_terminal())
                {
                    Ok(CallbackOutcome::Stale)
                } else {
                    Err(self.reject(&current, &callback, reported).await)
                }
            }
        }
    }

    /// Revoke a ticket on behalf of a user or operator.
    pub async fn revoke_ticket(
        &self,
        ticket_id: &str,
        revoked_by: &str,
        reason: Option<String>,
    ) -> Result<Ticket, OrchestratorError> {
        self.cancel(ticket_id, TicketStatus::Revoked, "revoke", reason.clone())
            .await?;
        self.emit(AuditEvent::TicketRevoked {
            ticket_id: ticket_id.to_string(),
            revoked_by: revoked_by.to_string(),
            reason,
        })
        .await;
        self.finish_cancel(ticket_id).await
    }

    /// Terminate a running ticket on behalf of an operator.
    pub async fn terminate_ticket(
        &self,
        ticket_id: &str,
        terminated_by: &str,
        reason: &str,
    ) -> Result<Ticket, OrchestratorError> {
        self.cancel(
            ticket_id,
            TicketStatus::Terminated,
            "terminate",
            Some(reason.to_string()),
        )
        .await?;
        self.emit(AuditEvent::TicketTerminated {
            ticket_id: ticket_id.to_string(),
            terminated_by: terminated_by.to_string(),
            reason: reason.to_string(),
        })
        .await;
        self.finish_cancel(ticket_id).await
    }

    /// Snapshot of ticket, flow and lock counts.
    pub fn status(&self) -> Result<OrchestratorStatus, OrchestratorError> {
        let mut status = OrchestratorStatus::default();

        for ticket_status in TicketStatus::ALL {
            let count = self
                .store
                .count(&TicketFilter::new().with_status(ticket_status))?;
            status.tickets.insert(ticket_status.to_string(), count);
        }
        for flow_status in FlowStatus::ALL {
            let count = self.store.count_flows(flow_status)?;
            status.flows.insert(flow_status.to_string(), count);
        }

        let entries = self.coordinator.entries()?;
        status.held_keys = entries.iter().filter(|e| e.holder.is_some()).count();
        status.waiting_flows = entries.iter().map(|e| e.waiting.len()).sum();

        Ok(status)
    }

    // =========================================================================
    // Work loop
    // =========================================================================

    async fn drive(&self, first: Work) {
        self.run_queue(VecDeque::from([first])).await;
    }

    /// Process work until nothing is left. Failures are logged; whatever they
    /// leave behind is picked up by reconciliation.
    pub(super) async fn run_queue(&self, mut queue: VecDeque<Work>) {
        while let Some(work) = queue.pop_front() {
            let result = match work {
                Work::Start(flow_id) => self.start_flow(&flow_id, &mut queue).await.map(|_| ()),
                Work::Changed(change) => self.on_flow_changed(change, &mut queue).await,
            };
            if let Err(e) = result {
                error!(error = %e, "Failed to advance flow");
            }
        }
    }

    /// Admit and submit a PENDING flow. Returns true when it was started.
    pub(super) async fn start_flow(
        &self,
        flow_id: &str,
        queue: &mut VecDeque<Work>,
    ) -> Result<bool, OrchestratorError> {
        let flow = self
            .store
            .get_flow(flow_id)?
            .ok_or_else(|| OrchestratorError::FlowNotFound(flow_id.to_string()))?;

        match flow.status {
            FlowStatus::Pending => {}
            status if status.is_terminal() => {
                // Promoted after it finished elsewhere: pass the key on.
                if let Some(next) = self.coordinator.release(&flow.exclusive_key, &flow.id)? {
                    queue.push_back(Work::Start(next));
                }
                return Ok(false);
            }
            _ => {
                debug!(flow_id = %flow.id, status = %flow.status, "Flow already started");
                return Ok(false);
            }
        }

        let ticket = self.ticket(&flow.ticket_id)?;
        if ticket.status.is_terminal() {
            if let Some(skipped) = self
                .transition(&flow, FlowUpdate::status(FlowStatus::Skipped))
                .await?
            {
                queue.push_back(Work::changed(&skipped, flow.status));
            }
            return Ok(false);
        }

        let flows = self.store.list_flows(&ticket.id)?;
        if !predecessors_complete(&flows, flow.ordinal) {
            debug!(flow_id = %flow.id, ordinal = flow.ordinal, "Earlier flows not done yet");
            return Ok(false);
        }

        match self.coordinator.acquire(&flow.exclusive_key, &flow.id)? {
            Admission::Queued { position } => {
                self.emit(AuditEvent::FlowQueued {
                    ticket_id: flow.ticket_id.clone(),
                    flow_id: flow.id.clone(),
                    exclusive_key: flow.exclusive_key.to_string(),
                    position,
                })
                .await;
                Ok(false)
            }
            Admission::Admitted => self.run_admitted(&flow, queue).await,
        }
    }

    async fn run_admitted(
        &self,
        flow: &Flow,
        queue: &mut VecDeque<Work>,
    ) -> Result<bool, OrchestratorError> {
        let Some(running) = self
            .transition(flow, FlowUpdate::status(FlowStatus::Running))
            .await?
        else {
            // Another starter may have won; it holds the key legitimately.
            // Only a flow withdrawn between admission and start gives it up.
            let current = self
                .store
                .get_flow(&flow.id)?
                .ok_or_else(|| OrchestratorError::FlowNotFound(flow.id.clone()))?;
            if current.status.is_terminal() {
                if let Some(next) = self.coordinator.release(&flow.exclusive_key, &flow.id)? {
                    queue.push_back(Work::Start(next));
                }
            } else {
                debug!(flow_id = %flow.id, status = %current.status, "Flow started by another caller");
            }
            return Ok(false);
        };

        self.emit(AuditEvent::FlowAdmitted {
            ticket_id: running.ticket_id.clone(),
            flow_id: running.id.clone(),
            exclusive_key: running.exclusive_key.to_string(),
        })
        .await;

        match self
            .controller
            .build_and_run(&running.root_id, running.flow_type, &running.context)
            .await
        {
            Ok(handle) => {
                info!(
                    flow_id = %running.id,
                    root_id = %handle.root_id,
                    nodes = handle.node_count,
                    runner = %handle.runner,
                    "Flow started"
                );
                Ok(true)
            }
            Err(e) => {
                let kind = match e {
                    SceneError::Validation(_) => FlowErrorKind::Validation,
                    SceneError::Pipeline(_) => FlowErrorKind::PipelineExecution,
                };
                let err = OrchestratorError::PipelineExecution {
                    flow_id: running.id.clone(),
                    detail: e.to_string(),
                };
                warn!(ticket_id = %running.ticket_id, "{}", err);

                let update = FlowUpdate::status(FlowStatus::Failed)
                    .with_error(FlowError::new(kind, e.to_string()));
                if let Some(failed) = self.transition(&running, update).await? {
                    queue.push_back(Work::changed(&failed, FlowStatus::Running));
                }
                Ok(false)
            }
        }
    }

    async fn on_flow_changed(
        &self,
        change: FlowChange,
        queue: &mut VecDeque<Work>,
    ) -> Result<(), OrchestratorError> {
        let Some(flow_id) = change.flow_id.as_deref() else {
            return Ok(());
        };
        let flow = self
            .store
            .get_flow(flow_id)?
            .ok_or_else(|| OrchestratorError::FlowNotFound(flow_id.to_string()))?;

        if change.to.is_terminal() {
            if let Some(next) = self.coordinator.release(&flow.exclusive_key, &flow.id)? {
                queue.push_back(Work::Start(next));
            }
        }

        if change.to == FlowStatus::Failed && is_retryable(&flow, &self.config) {
            self.spawn_continuation(&flow, queue).await?;
        }

        let status = self.recompute(&change.ticket_id, queue).await?;

        if status == TicketStatus::Running && change.to == FlowStatus::Succeeded {
            let flows = self.store.list_flows(&change.ticket_id)?;
            let next = Flow::latest_attempts(&flows)
                .into_iter()
                .find(|f| f.ordinal > flow.ordinal && f.status == FlowStatus::Pending)
                .map(|f| f.id.clone());
            if let Some(next) = next {
                debug!(ticket_id = %change.ticket_id, next_flow = %next, "Advancing ticket");
                queue.push_back(Work::Start(next));
            }
        }

        Ok(())
    }

    /// Queue a retry of a failed flow behind the other waiters for its key.
    async fn spawn_continuation(
        &self,
        failed: &Flow,
        queue: &mut VecDeque<Work>,
    ) -> Result<(), OrchestratorError> {
        let ticket = self.ticket(&failed.ticket_id)?;
        if ticket.status.is_terminal() {
            return Ok(());
        }
        let flows = self.store.list_flows(&ticket.id)?;
        if flows
            .iter()
            .any(|f| f.retry_of.as_deref() == Some(failed.id.as_str()))
        {
            return Ok(());
        }

        let next = self.store.add_flow(NewFlow {
            ticket_id: failed.ticket_id.clone(),
            ordinal: failed.ordinal,
            plan: FlowPlan {
                flow_type: failed.flow_type,
                context: failed.context.clone(),
                exclusive_key: failed.exclusive_key.clone(),
            },
            retry_count: failed.retry_count + 1,
            retry_of: Some(failed.id.clone()),
        })?;

        metrics::FLOW_RETRIES.with_label_values(&["auto_retry"]).inc();
        info!(
            ticket_id = %failed.ticket_id,
            failed_flow = %failed.id,
            new_flow = %next.id,
            retry_count = next.retry_count,
            "Retrying failed flow"
        );
        self.emit(AuditEvent::FlowRetried {
            ticket_id: failed.ticket_id.clone(),
            flow_id: failed.id.clone(),
            retry_count: next.retry_count,
            reason: "auto_retry".to_string(),
            new_flow_id: Some(next.id.clone()),
        })
        .await;

        queue.push_back(Work::Start(next.id));
        Ok(())
    }

    /// Recompute and persist a ticket's status from its flows.
    async fn recompute(
        &self,
        ticket_id: &str,
        queue: &mut VecDeque<Work>,
    ) -> Result<TicketStatus, OrchestratorError> {
        let (from, to) = {
            let _guard = self.status_lock.lock().await;
            let ticket = self.ticket(ticket_id)?;
            if ticket.status.is_terminal() {
                return Ok(ticket.status);
            }
            let flows = self.store.list_flows(ticket_id)?;
            let next = compute_ticket_status(ticket.status, &flows, &self.config);
            if next == ticket.status {
                return Ok(next);
            }
            self.store.update_status(ticket_id, next)?;
            (ticket.status, next)
        };

        self.ticket_transitioned(ticket_id, from, to, None).await;

        if to == TicketStatus::Terminated {
            self.withdraw_flows(ticket_id, FlowStatus::Skipped, queue)
                .await?;
        }
        Ok(to)
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    async fn cancel(
        &self,
        ticket_id: &str,
        status: TicketStatus,
        operation: &str,
        reason: Option<String>,
    ) -> Result<(), OrchestratorError> {
        let from = {
            let _guard = self.status_lock.lock().await;
            let ticket = self.ticket(ticket_id)?;
            if ticket.status.is_terminal() {
                return Err(OrchestratorError::InvalidState {
                    ticket_id: ticket_id.to_string(),
                    current: ticket.status.to_string(),
                    operation: operation.to_string(),
                });
            }
            self.store.update_status(ticket_id, status)?;
            ticket.status
        };

        self.ticket_transitioned(ticket_id, from, status, reason)
            .await;
        Ok(())
    }

    async fn finish_cancel(&self, ticket_id: &str) -> Result<Ticket, OrchestratorError> {
        let mut queue = VecDeque::new();
        self.withdraw_flows(ticket_id, FlowStatus::Revoked, &mut queue)
            .await?;
        self.run_queue(queue).await;
        self.ticket(ticket_id)
    }

    /// Move every unfinished flow of a ticket to `target`.
    async fn withdraw_flows(
        &self,
        ticket_id: &str,
        target: FlowStatus,
        queue: &mut VecDeque<Work>,
    ) -> Result<(), OrchestratorError> {
        for flow in self.store.list_flows(ticket_id)? {
            if !flow.status.can_transition_to(target) {
                continue;
            }
            if let Some(updated) = self
                .transition(&flow, FlowUpdate::status(target))
                .await?
            {
                queue.push_back(Work::changed(&updated, flow.status));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Compare-and-set a flow from its current status. `None` when another
    /// writer got there first.
    pub(super) async fn transition(
        &self,
        flow: &Flow,
        update: FlowUpdate,
    ) -> Result<Option<Flow>, OrchestratorError> {
        let to = update.status;
        let error = update.error.as_ref().map(|e| e.detail.clone());

        let Some(updated) = self.store.transition_flow(&flow.id, flow.status, update)? else {
            debug!(
                flow_id = %flow.id,
                expected = %flow.status,
                to = %to,
                "Flow changed concurrently, transition skipped"
            );
            return Ok(None);
        };

        metrics::FLOW_TRANSITIONS
            .with_label_values(&[flow.status.as_str(), to.as_str()])
            .inc();
        info!(
            ticket_id = %flow.ticket_id,
            flow_id = %flow.id,
            from = %flow.status,
            to = %to,
            "Flow status changed"
        );
        self.emit(AuditEvent::FlowStatusChanged {
            ticket_id: flow.ticket_id.clone(),
            flow_id: flow.id.clone(),
            from_status: flow.status.to_string(),
            to_status: to.to_string(),
            error,
        })
        .await;

        Ok(Some(updated))
    }

    async fn progress(
        &self,
        flow: &Flow,
        callback: &PipelineCallback,
    ) -> Result<CallbackOutcome, OrchestratorError> {
        match flow.status {
            FlowStatus::Running => {
                debug!(
                    flow_id = %flow.id,
                    node_id = %callback.node_id,
                    status = callback.status.as_str(),
                    "Pipeline progress"
                );
                Ok(CallbackOutcome::Progress)
            }
            status if status.is_terminal() => {
                debug!(flow_id = %flow.id, status = %status, "Late progress report");
                Ok(CallbackOutcome::Stale)
            }
            _ => Err(self.reject(flow, callback, FlowStatus::Running).await),
        }
    }

    async fn reject(
        &self,
        flow: &Flow,
        callback: &PipelineCallback,
        reported: FlowStatus,
    ) -> OrchestratorError {
        let err = OrchestratorError::InconsistentState {
            flow_id: flow.id.clone(),
            current: flow.status,
            reported,
        };
        warn!(
            ticket_id = %flow.ticket_id,
            node_id = %callback.node_id,
            "Rejected pipeline report: {}",
            err
        );
        metrics::INCONSISTENT_UPDATES.inc();
        self.emit(AuditEvent::InconsistentUpdateRejected {
            ticket_id: flow.ticket_id.clone(),
            flow_id: flow.id.clone(),
            node_id: callback.node_id.clone(),
            current_status: flow.status.to_string(),
            reported_status: reported.to_string(),
        })
        .await;
        err
    }

    async fn ticket_transitioned(
        &self,
        ticket_id: &str,
        from: TicketStatus,
        to: TicketStatus,
        reason: Option<String>,
    ) {
        metrics::TICKET_TRANSITIONS
            .with_label_values(&[to.as_str()])
            .inc();
        info!(ticket_id = %ticket_id, from = %from, to = %to, "Ticket status changed");
        self.emit(AuditEvent::TicketStatusChanged {
            ticket_id: ticket_id.to_string(),
            from_status: from.to_string(),
            to_status: to.to_string(),
            reason,
        })
        .await;
        self.notify(ticket_id, to);
    }

    fn notify(&self, ticket_id: &str, status: TicketStatus) {
        if let Some(ref callback) = self.update_callback {
            callback(ticket_id, status);
        }
    }

    pub(super) async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }
}

/// Context reported by a finished pipeline, merged over the flow's own.
fn merge_context(
    context: &serde_json::Value,
    payload: &serde_json::Value,
) -> Option<serde_json::Value> {
    let reported = payload.as_object()?;
    let mut merged = context.as_object().cloned().unwrap_or_default();
    merged.extend(reported.iter().map(|(k, v)| (k.clone(), v.clone())));
    Some(serde_json::Value::Object(merged))
}
