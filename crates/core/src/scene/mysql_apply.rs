//! New master/slave cluster deployment.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::exclusive::ExclusiveKey;
use crate::ticket::{FlowPlan, TicketType};

use super::graph::{Act, StepGraph, StepGraphBuilder};
use super::params::{ensure_distinct, ensure_ip, ensure_non_empty, parse, to_context, ValidationError};

const TICKET_TYPE: TicketType = TicketType::MysqlHaApply;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Access domain of the new cluster; unique per ticket.
    pub name: String,
    pub master_ip: String,
    pub slave_ip: String,
}

#[derive(Debug, Deserialize)]
struct ApplyParams {
    bk_biz_id: u64,
    db_version: String,
    clusters: Vec<ClusterSpec>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApplyContext {
    bk_biz_id: u64,
    db_version: String,
    cluster: ClusterSpec,
}

fn check_cluster(cluster: &ClusterSpec) -> Result<(), ValidationError> {
    if cluster.name.trim().is_empty() {
        return Err(ValidationError::invalid("clusters.name", "must not be empty"));
    }
    ensure_ip("clusters.master_ip", &cluster.master_ip)?;
    ensure_ip("clusters.slave_ip", &cluster.slave_ip)?;
    ensure_distinct("clusters", &cluster.master_ip, &cluster.slave_ip)
}

/// One flow per new cluster, keyed by its domain.
pub fn plan(params: &serde_json::Value) -> Result<Vec<FlowPlan>, ValidationError> {
    let params: ApplyParams = parse(TICKET_TYPE, params)?;
    ensure_non_empty("clusters", &params.clusters)?;
    if params.db_version.trim().is_empty() {
        return Err(ValidationError::invalid("db_version", "must not be empty"));
    }

    let mut names = HashSet::new();
    let mut plans = Vec::with_capacity(params.clusters.len());
    for cluster in params.clusters {
        check_cluster(&cluster)?;
        if !names.insert(cluster.name.clone()) {
            return Err(ValidationError::invalid(
                "clusters.name",
                format!("{} requested twice", cluster.name),
            ));
        }
        let exclusive_key = ExclusiveKey::domain(&cluster.name);
        let context = ApplyContext {
            bk_biz_id: params.bk_biz_id,
            db_version: params.db_version.clone(),
            cluster,
        };
        plans.push(FlowPlan {
            flow_type: TICKET_TYPE,
            context: to_context(TICKET_TYPE, &context)?,
            exclusive_key,
        });
    }
    Ok(plans)
}

pub fn build(root_id: &str, context: &serde_json::Value) -> Result<StepGraph, ValidationError> {
    let ctx: ApplyContext = parse(TICKET_TYPE, context)?;
    check_cluster(&ctx.cluster)?;
    let c = &ctx.cluster;

    let install = |ip: &str| {
        (
            format!("install mysql on {}", ip),
            Act::InstallMysql,
            json!({"ip": ip, "db_version": ctx.db_version, "bk_biz_id": ctx.bk_biz_id}),
        )
    };

    Ok(StepGraphBuilder::new(root_id, format!("deploy cluster {}", c.name))
        .add_act(
            "transfer package",
            Act::TransferPackage,
            json!({"hosts": [c.master_ip, c.slave_ip], "db_version": ctx.db_version}),
        )
        .add_parallel_acts(vec![install(&c.master_ip), install(&c.slave_ip)])
        .add_act(
            "init replication",
            Act::InitReplication,
            json!({"master_ip": c.master_ip, "slave_ip": c.slave_ip}),
        )
        .add_act(
            "add domain",
            Act::AddDomain,
            json!({"domain": c.name, "ip": c.master_ip}),
        )
        .add_act(
            "register cluster",
            Act::UpdateClusterMeta,
            json!({"op": "create", "name": c.name, "bk_biz_id": ctx.bk_biz_id,
                   "master_ip": c.master_ip, "slave_ip": c.slave_ip}),
        )
        .build())
}
