//! The two reconciliation tasks.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::exclusive::ExclusiveKey;
use crate::metrics;
use crate::orchestrator::{RetryReport, TicketFlowManager};
use crate::scene::{DataRepairParams, RepairTable, RepairTrigger};
use crate::ticket::{CreateTicketRequest, Ticket, TicketFilter, TicketStatus, TicketType};

use super::config::SchedulerConfig;
use super::repair::{ChecksumReport, RepairSource};
use super::ReconcileError;

/// Creator recorded on tickets synthesized by reconciliation.
pub const SYSTEM_CREATOR: &str = "system";

/// Outcome of one data repair pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    /// Clusters with inconsistent tables in the window.
    pub clusters: usize,
    /// Tickets created this pass.
    pub created: Vec<String>,
    /// Clusters already covered by a repair ticket.
    pub skipped: usize,
    /// Clusters whose ticket could not be created.
    pub failed: usize,
}

/// Periodic reconciliation work. Each task is safe to run repeatedly.
pub struct Reconciler {
    manager: Arc<TicketFlowManager>,
    repairs: Arc<dyn RepairSource>,
    config: SchedulerConfig,
    audit: Option<AuditHandle>,
}

impl Reconciler {
    pub fn new(
        manager: Arc<TicketFlowManager>,
        repairs: Arc<dyn RepairSource>,
        config: SchedulerConfig,
        audit: Option<AuditHandle>,
    ) -> Self {
        Self {
            manager,
            repairs,
            config,
            audit,
        }
    }

    /// Re-drive flows stuck waiting for their exclusivity key.
    pub async fn retry_exclusive_inner_flow(&self) -> Result<RetryReport, ReconcileError> {
        let started = Instant::now();
        let report = self.manager.retry_stalled_flows().await?;
        self.completed("exclusive_retry", report.examined, report.changed(), started)
            .await;
        Ok(report)
    }

    /// Open one data repair ticket per cluster with recent checksum drift.
    ///
    /// Clusters already covered by a running repair ticket, or by one created
    /// after their newest report, are skipped.
    pub async fn auto_create_data_repair_ticket(&self) -> Result<RepairReport, ReconcileError> {
        let started = Instant::now();
        let since = Utc::now() - Duration::hours(i64::from(self.config.data_repair_window_hours));

        let mut by_cluster: BTreeMap<u64, Vec<ChecksumReport>> = BTreeMap::new();
        for report in self.repairs.inconsistent_since(since)? {
            by_cluster.entry(report.cluster_id).or_default().push(report);
        }

        let repairs = TicketFilter::new()
            .with_ticket_type(TicketType::MysqlDataRepair)
            .unpaged();
        let store = self.manager.store();
        let mut recent: Vec<Ticket> =
            store.list(&repairs.clone().with_status(TicketStatus::Running))?;
        recent.extend(
            store
                .list(&repairs.with_created_after(since))?
                .into_iter()
                .filter(|t| t.status != TicketStatus::Running),
        );

        let mut report = RepairReport {
            clusters: by_cluster.len(),
            ..RepairReport::default()
        };

        for (cluster_id, reports) in by_cluster {
            let key = ExclusiveKey::cluster(cluster_id);
            let newest = reports.iter().map(|r| r.reported_at).max();
            let covered = recent.iter().any(|t| {
                t.covers(&key)
                    && (t.status == TicketStatus::Running || Some(t.created_at) >= newest)
            });
            if covered {
                debug!(cluster_id, "Cluster already has a repair ticket");
                report.skipped += 1;
                continue;
            }

            match self.create_repair_ticket(cluster_id, &reports).await {
                Ok(ticket) => report.created.push(ticket.id),
                Err(e) => {
                    warn!(cluster_id, error = %e, "Failed to create data repair ticket");
                    report.failed += 1;
                }
            }
        }

        self.completed("data_repair", report.clusters, report.created.len(), started)
            .await;
        Ok(report)
    }

    async fn create_repair_ticket(
        &self,
        cluster_id: u64,
        reports: &[ChecksumReport],
    ) -> Result<Ticket, ReconcileError> {
        let params = repair_params(cluster_id, reports);
        let table_count = params.tables.len();
        let params = serde_json::to_value(&params)
            .map_err(|e| ReconcileError::Corrupt(format!("repair params: {}", e)))?;

        let ticket = self
            .manager
            .create_ticket(CreateTicketRequest {
                creator: SYSTEM_CREATOR.to_string(),
                ticket_type: TicketType::MysqlDataRepair,
                params,
            })
            .await?;

        metrics::REPAIR_TICKETS_CREATED.inc();
        info!(ticket_id = %ticket.id, cluster_id, tables = table_count, "Created data repair ticket");
        self.emit(AuditEvent::RepairTicketCreated {
            ticket_id: ticket.id.clone(),
            cluster_id,
            table_count,
        })
        .await;
        Ok(ticket)
    }

    async fn completed(&self, task: &str, examined: usize, changed: usize, started: Instant) {
        let elapsed = started.elapsed();
        metrics::RECONCILE_DURATION
            .with_label_values(&[task])
            .observe(elapsed.as_secs_f64());
        self.emit(AuditEvent::ReconciliationCompleted {
            task: task.to_string(),
            examined,
            changed,
            duration_ms: elapsed.as_millis() as u64,
        })
        .await;
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }
}

/// Repair parameters covering every drifted table and slave of one cluster.
fn repair_params(cluster_id: u64, reports: &[ChecksumReport]) -> DataRepairParams {
    // Reports are oldest first; the newest one names the current master.
    let master_ip = reports
        .last()
        .map(|r| r.master_ip.clone())
        .unwrap_or_default();
    let slave_ips: BTreeSet<String> = reports
        .iter()
        .filter(|r| r.master_ip == master_ip)
        .map(|r| r.slave_ip.clone())
        .collect();
    let tables: BTreeSet<RepairTable> = reports
        .iter()
        .map(|r| RepairTable {
            db: r.db.clone(),
            tbl: r.tbl.clone(),
        })
        .collect();

    DataRepairParams {
        cluster_id,
        master_ip,
        slave_ips: slave_ips.into_iter().collect(),
        tables: tables.into_iter().collect(),
        trigger: RepairTrigger::Routine,
    }
}
