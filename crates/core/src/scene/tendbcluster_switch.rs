//! TenDB Cluster remote storage switchover and failover.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::exclusive::ExclusiveKey;
use crate::ticket::{FlowPlan, TicketType};

use super::graph::{Act, StepGraph, StepGraphBuilder};
use super::mysql_switch::{precondition, SwitchChecks, SwitchMode};
use super::params::{ensure_distinct, ensure_ip, ensure_non_empty, parse, to_context, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SwitchTuple {
    master_ip: String,
    slave_ip: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClusterSwitch {
    cluster_id: u64,
    switch_tuples: Vec<SwitchTuple>,
}

#[derive(Debug, Deserialize)]
struct TendbSwitchParams {
    infos: Vec<ClusterSwitch>,
    #[serde(default)]
    force: bool,
    #[serde(flatten)]
    checks: SwitchChecks,
}

#[derive(Debug, Serialize, Deserialize)]
struct TendbSwitchContext {
    #[serde(flatten)]
    info: ClusterSwitch,
    force: bool,
    #[serde(flatten)]
    checks: SwitchChecks,
}

fn check_tuples(tuples: &[SwitchTuple]) -> Result<(), ValidationError> {
    ensure_non_empty("infos.switch_tuples", tuples)?;
    for tuple in tuples {
        ensure_ip("switch_tuples.master_ip", &tuple.master_ip)?;
        ensure_ip("switch_tuples.slave_ip", &tuple.slave_ip)?;
        ensure_distinct("switch_tuples", &tuple.master_ip, &tuple.slave_ip)?;
    }
    Ok(())
}

pub fn plan(ticket_type: TicketType, params: &serde_json::Value) -> Result<Vec<FlowPlan>, ValidationError> {
    let params: TendbSwitchParams = parse(ticket_type, params)?;
    ensure_non_empty("infos", &params.infos)?;

    let mut seen = HashSet::new();
    let mut plans = Vec::with_capacity(params.infos.len());
    for info in params.infos {
        check_tuples(&info.switch_tuples)?;
        if !seen.insert(info.cluster_id) {
            return Err(ValidationError::invalid(
                "infos.cluster_id",
                format!("cluster {} targeted twice", info.cluster_id),
            ));
        }
        let exclusive_key = ExclusiveKey::cluster(info.cluster_id);
        let context = TendbSwitchContext {
            info,
            force: params.force,
            checks: params.checks,
        };
        plans.push(FlowPlan {
            flow_type: ticket_type,
            context: to_context(ticket_type, &context)?,
            exclusive_key,
        });
    }
    Ok(plans)
}

fn build_with_mode(
    ticket_type: TicketType,
    root_id: &str,
    context: &serde_json::Value,
    fail_over: bool,
) -> Result<StepGraph, ValidationError> {
    let ctx: TendbSwitchContext = parse(ticket_type, context)?;
    check_tuples(&ctx.info.switch_tuples)?;
    // failover always forces the switch
    let mode = if fail_over {
        SwitchMode {
            is_dead_master: true,
            force: true,
        }
    } else {
        SwitchMode {
            is_dead_master: false,
            force: ctx.force,
        }
    };
    let cluster_id = ctx.info.cluster_id;

    let switches = ctx
        .info
        .switch_tuples
        .iter()
        .map(|t| {
            (
                format!("switch {} -> {}", t.master_ip, t.slave_ip),
                Act::SwitchRemotePair,
                json!({
                    "cluster_id": cluster_id,
                    "master_ip": t.master_ip,
                    "slave_ip": t.slave_ip,
                    "force": mode.force,
                }),
            )
        })
        .collect();

    Ok(StepGraphBuilder::new(root_id, format!("switch remotes of cluster {}", cluster_id))
        .add_step(precondition(&[cluster_id], &ctx.checks, mode))
        .add_parallel_acts(switches)
        .add_act(
            "update spider routing",
            Act::UpdateSpiderRouting,
            json!({"cluster_id": cluster_id, "force": mode.force}),
        )
        .add_act(
            "update cluster meta",
            Act::UpdateClusterMeta,
            json!({"op": "switch_remotes", "cluster_id": cluster_id, "switch_tuples": ctx.info.switch_tuples}),
        )
        .build())
}

pub fn build_master_slave_switch(root_id: &str, context: &serde_json::Value) -> Result<StepGraph, ValidationError> {
    build_with_mode(TicketType::TendbclusterMasterSlaveSwitch, root_id, context, false)
}

pub fn build_master_fail_over(root_id: &str, context: &serde_json::Value) -> Result<StepGraph, ValidationError> {
    build_with_mode(TicketType::TendbclusterMasterFailOver, root_id, context, true)
}
