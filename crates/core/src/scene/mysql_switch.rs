//! Master/slave switchover and dead-master failover.
//!
//! Both scenes share one graph; failover only changes the [`SwitchMode`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::exclusive::ExclusiveKey;
use crate::ticket::{FlowPlan, TicketType};

use super::graph::{Act, StepGraph, StepGraphBuilder};
use super::params::{
    default_true, ensure_distinct, ensure_ip, ensure_non_empty, parse, to_context,
    ValidationError,
};

/// Variant knobs for the shared switch builders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchMode {
    /// The old master is unreachable; skip steps that need it.
    pub is_dead_master: bool,
    /// Proceed even when precondition checks fail.
    pub force: bool,
}

impl SwitchMode {
    pub const SWITCH: SwitchMode = SwitchMode {
        is_dead_master: false,
        force: false,
    };

    pub const FAIL_OVER: SwitchMode = SwitchMode {
        is_dead_master: true,
        force: false,
    };
}

/// Precondition node every switch graph starts with.
pub(crate) fn precondition(
    cluster_ids: &[u64],
    checks: &SwitchChecks,
    mode: SwitchMode,
) -> (String, Act, serde_json::Value) {
    (
        "check switch precondition".to_string(),
        Act::CheckSwitchPrecondition,
        json!({
            "cluster_ids": cluster_ids,
            // a dead master has no processes or delay to inspect
            "is_check_process": checks.is_check_process && !mode.is_dead_master,
            "is_check_delay": checks.is_check_delay && !mode.is_dead_master,
            "is_verify_checksum": checks.is_verify_checksum && !mode.is_dead_master,
            "is_dead_master": mode.is_dead_master,
            "force": mode.force,
        }),
    )
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) struct SwitchChecks {
    #[serde(default = "default_true")]
    pub is_check_process: bool,
    #[serde(default = "default_true")]
    pub is_check_delay: bool,
    #[serde(default = "default_true")]
    pub is_verify_checksum: bool,
}

#[derive(Debug, Deserialize)]
struct SwitchInfo {
    cluster_ids: Vec<u64>,
    master_ip: String,
    slave_ip: String,
}

#[derive(Debug, Deserialize)]
struct SwitchParams {
    infos: Vec<SwitchInfo>,
    #[serde(flatten)]
    checks: SwitchChecks,
}

#[derive(Debug, Serialize, Deserialize)]
struct SwitchContext {
    cluster_id: u64,
    master_ip: String,
    slave_ip: String,
    #[serde(flatten)]
    checks: SwitchChecks,
}

fn check_pair(master_ip: &str, slave_ip: &str) -> Result<(), ValidationError> {
    ensure_ip("infos.master_ip", master_ip)?;
    ensure_ip("infos.slave_ip", slave_ip)?;
    ensure_distinct("infos", master_ip, slave_ip)
}

/// One flow per target cluster. A cluster may appear in only one info.
pub fn plan(ticket_type: TicketType, params: &serde_json::Value) -> Result<Vec<FlowPlan>, ValidationError> {
    let params: SwitchParams = parse(ticket_type, params)?;
    ensure_non_empty("infos", &params.infos)?;

    let mut seen = HashSet::new();
    let mut plans = Vec::new();
    for info in &params.infos {
        ensure_non_empty("infos.cluster_ids", &info.cluster_ids)?;
        check_pair(&info.master_ip, &info.slave_ip)?;
        for &cluster_id in &info.cluster_ids {
            if !seen.insert(cluster_id) {
                return Err(ValidationError::invalid(
                    "infos.cluster_ids",
                    format!("cluster {} targeted twice", cluster_id),
                ));
            }
            let context = SwitchContext {
                cluster_id,
                master_ip: info.master_ip.clone(),
                slave_ip: info.slave_ip.clone(),
                checks: params.checks,
            };
            plans.push(FlowPlan {
                flow_type: ticket_type,
                context: to_context(ticket_type, &context)?,
                exclusive_key: ExclusiveKey::cluster(cluster_id),
            });
        }
    }
    Ok(plans)
}

/// Shared switch graph, parameterized by `mode`.
pub fn build_switch(
    ticket_type: TicketType,
    root_id: &str,
    context: &serde_json::Value,
    mode: SwitchMode,
) -> Result<StepGraph, ValidationError> {
    let ctx: SwitchContext = parse(ticket_type, context)?;
    check_pair(&ctx.master_ip, &ctx.slave_ip)?;

    let name = if mode.is_dead_master {
        format!("fail over cluster {}", ctx.cluster_id)
    } else {
        format!("switch cluster {}", ctx.cluster_id)
    };

    Ok(StepGraphBuilder::new(root_id, name)
        .add_step(precondition(&[ctx.cluster_id], &ctx.checks, mode))
        .add_act(
            "switch master and slave",
            Act::SwitchMasterSlave,
            json!({
                "cluster_id": ctx.cluster_id,
                "master_ip": ctx.master_ip,
                "slave_ip": ctx.slave_ip,
                "is_dead_master": mode.is_dead_master,
            }),
        )
        .add_act(
            "repoint slaves",
            Act::RepointSlaves,
            json!({"cluster_id": ctx.cluster_id, "new_master_ip": ctx.slave_ip}),
        )
        .add_act(
            "switch domain",
            Act::AddDomain,
            json!({"cluster_id": ctx.cluster_id, "ip": ctx.slave_ip, "replace": ctx.master_ip}),
        )
        .add_act(
            "update cluster meta",
            Act::UpdateClusterMeta,
            json!({
                "op": "switch",
                "cluster_id": ctx.cluster_id,
                "new_master_ip": ctx.slave_ip,
                "old_master_ip": ctx.master_ip,
                "old_master_lost": mode.is_dead_master,
            }),
        )
        .build())
}

pub fn build_master_slave_switch(root_id: &str, context: &serde_json::Value) -> Result<StepGraph, ValidationError> {
    build_switch(TicketType::MysqlMasterSlaveSwitch, root_id, context, SwitchMode::SWITCH)
}

pub fn build_master_fail_over(root_id: &str, context: &serde_json::Value) -> Result<StepGraph, ValidationError> {
    build_switch(TicketType::MysqlMasterFailOver, root_id, context, SwitchMode::FAIL_OVER)
}
