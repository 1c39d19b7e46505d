//! Data repair of tables found inconsistent by checksum.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::exclusive::ExclusiveKey;
use crate::ticket::{FlowPlan, TicketType};

use super::graph::{Act, StepGraph, StepGraphBuilder};
use super::params::{ensure_ip, ensure_non_empty, parse, to_context, ValidationError};

const TICKET_TYPE: TicketType = TicketType::MysqlDataRepair;

/// What started the repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairTrigger {
    #[default]
    Manual,
    /// Created by the daily reconciliation pass.
    Routine,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepairTable {
    pub db: String,
    pub tbl: String,
}

/// Parameters of a `MYSQL_DATA_REPAIR` ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRepairParams {
    pub cluster_id: u64,
    pub master_ip: String,
    pub slave_ips: Vec<String>,
    pub tables: Vec<RepairTable>,
    #[serde(default)]
    pub trigger: RepairTrigger,
}

impl DataRepairParams {
    fn check(&self) -> Result<(), ValidationError> {
        ensure_ip("master_ip", &self.master_ip)?;
        ensure_non_empty("slave_ips", &self.slave_ips)?;
        for ip in &self.slave_ips {
            ensure_ip("slave_ips", ip)?;
            if *ip == self.master_ip {
                return Err(ValidationError::invalid("slave_ips", "contains the master"));
            }
        }
        ensure_non_empty("tables", &self.tables)?;
        let unique: BTreeSet<&RepairTable> = self.tables.iter().collect();
        if unique.len() != self.tables.len() {
            return Err(ValidationError::invalid("tables", "contains duplicates"));
        }
        Ok(())
    }
}

/// A repair ticket touches one cluster and runs as a single flow.
pub fn plan(params: &serde_json::Value) -> Result<Vec<FlowPlan>, ValidationError> {
    let params: DataRepairParams = parse(TICKET_TYPE, params)?;
    params.check()?;
    Ok(vec![FlowPlan {
        flow_type: TICKET_TYPE,
        context: to_context(TICKET_TYPE, &params)?,
        exclusive_key: ExclusiveKey::cluster(params.cluster_id),
    }])
}

pub fn build(root_id: &str, context: &serde_json::Value) -> Result<StepGraph, ValidationError> {
    let params: DataRepairParams = parse(TICKET_TYPE, context)?;
    params.check()?;

    let repairs = params
        .slave_ips
        .iter()
        .map(|ip| {
            (
                format!("repair tables on {}", ip),
                Act::RepairTables,
                json!({
                    "cluster_id": params.cluster_id,
                    "master_ip": params.master_ip,
                    "slave_ip": ip,
                    "tables": params.tables,
                }),
            )
        })
        .collect();

    Ok(StepGraphBuilder::new(root_id, format!("repair data of cluster {}", params.cluster_id))
        .add_parallel_acts(repairs)
        .add_act(
            "verify checksum",
            Act::VerifyChecksum,
            json!({"cluster_id": params.cluster_id, "tables": params.tables}),
        )
        .build())
}
