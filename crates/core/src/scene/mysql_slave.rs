//! Adding and removing slaves of an existing cluster.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::exclusive::ExclusiveKey;
use crate::ticket::{FlowPlan, TicketType};

use super::graph::{Act, StepGraph, StepGraphBuilder};
use super::params::{ensure_distinct, ensure_ip, ensure_non_empty, parse, to_context, ValidationError};

/// Where the new slave's data comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupSource {
    #[default]
    Master,
    Slave,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AddSlaveInfo {
    cluster_id: u64,
    master_ip: String,
    new_slave_ip: String,
}

#[derive(Debug, Deserialize)]
struct AddSlaveParams {
    infos: Vec<AddSlaveInfo>,
    #[serde(default)]
    backup_source: BackupSource,
}

#[derive(Debug, Serialize, Deserialize)]
struct AddSlaveContext {
    #[serde(flatten)]
    info: AddSlaveInfo,
    backup_source: BackupSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReduceSlaveInfo {
    cluster_id: u64,
    old_slave_ip: String,
}

#[derive(Debug, Deserialize)]
struct ReduceSlaveParams {
    infos: Vec<ReduceSlaveInfo>,
}

fn unique_cluster(seen: &mut HashSet<u64>, cluster_id: u64) -> Result<(), ValidationError> {
    if !seen.insert(cluster_id) {
        return Err(ValidationError::invalid(
            "infos.cluster_id",
            format!("cluster {} targeted twice", cluster_id),
        ));
    }
    Ok(())
}

fn check_add(info: &AddSlaveInfo) -> Result<(), ValidationError> {
    ensure_ip("infos.master_ip", &info.master_ip)?;
    ensure_ip("infos.new_slave_ip", &info.new_slave_ip)?;
    ensure_distinct("infos", &info.master_ip, &info.new_slave_ip)
}

pub fn plan_add(params: &serde_json::Value) -> Result<Vec<FlowPlan>, ValidationError> {
    let ticket_type = TicketType::MysqlAddSlave;
    let params: AddSlaveParams = parse(ticket_type, params)?;
    ensure_non_empty("infos", &params.infos)?;

    let mut seen = HashSet::new();
    let mut plans = Vec::with_capacity(params.infos.len());
    for info in params.infos {
        check_add(&info)?;
        unique_cluster(&mut seen, info.cluster_id)?;
        let exclusive_key = ExclusiveKey::cluster(info.cluster_id);
        let context = AddSlaveContext {
            info,
            backup_source: params.backup_source,
        };
        plans.push(FlowPlan {
            flow_type: ticket_type,
            context: to_context(ticket_type, &context)?,
            exclusive_key,
        });
    }
    Ok(plans)
}

pub fn build_add(root_id: &str, context: &serde_json::Value) -> Result<StepGraph, ValidationError> {
    let ctx: AddSlaveContext = parse(TicketType::MysqlAddSlave, context)?;
    check_add(&ctx.info)?;
    let info = &ctx.info;

    Ok(StepGraphBuilder::new(root_id, format!("add slave to cluster {}", info.cluster_id))
        .add_act(
            "transfer package",
            Act::TransferPackage,
            json!({"hosts": [info.new_slave_ip]}),
        )
        .add_act(
            "install mysql",
            Act::InstallMysql,
            json!({"ip": info.new_slave_ip, "cluster_id": info.cluster_id}),
        )
        .add_act(
            "restore backup",
            Act::RestoreBackup,
            json!({"cluster_id": info.cluster_id, "target_ip": info.new_slave_ip, "source": ctx.backup_source}),
        )
        .add_act(
            "init replication",
            Act::InitReplication,
            json!({"master_ip": info.master_ip, "slave_ip": info.new_slave_ip}),
        )
        .add_act(
            "update cluster meta",
            Act::UpdateClusterMeta,
            json!({"op": "add_slave", "cluster_id": info.cluster_id, "slave_ip": info.new_slave_ip}),
        )
        .build())
}

pub fn plan_reduce(params: &serde_json::Value) -> Result<Vec<FlowPlan>, ValidationError> {
    let ticket_type = TicketType::MysqlReduceSlave;
    let params: ReduceSlaveParams = parse(ticket_type, params)?;
    ensure_non_empty("infos", &params.infos)?;

    let mut seen = HashSet::new();
    let mut plans = Vec::with_capacity(params.infos.len());
    for info in params.infos {
        ensure_ip("infos.old_slave_ip", &info.old_slave_ip)?;
        unique_cluster(&mut seen, info.cluster_id)?;
        plans.push(FlowPlan {
            flow_type: ticket_type,
            context: to_context(ticket_type, &info)?,
            exclusive_key: ExclusiveKey::cluster(info.cluster_id),
        });
    }
    Ok(plans)
}

pub fn build_reduce(root_id: &str, context: &serde_json::Value) -> Result<StepGraph, ValidationError> {
    let info: ReduceSlaveInfo = parse(TicketType::MysqlReduceSlave, context)?;
    ensure_ip("infos.old_slave_ip", &info.old_slave_ip)?;

    Ok(StepGraphBuilder::new(root_id, format!("reduce slave of cluster {}", info.cluster_id))
        .add_act(
            "remove domain",
            Act::RemoveDomain,
            json!({"cluster_id": info.cluster_id, "ip": info.old_slave_ip}),
        )
        .add_act(
            "update cluster meta",
            Act::UpdateClusterMeta,
            json!({"op": "reduce_slave", "cluster_id": info.cluster_id, "slave_ip": info.old_slave_ip}),
        )
        .add_act(
            "uninstall mysql",
            Act::UninstallMysql,
            json!({"ip": info.old_slave_ip}),
        )
        .build())
}
