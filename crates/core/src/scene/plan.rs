//! Splitting a ticket into flows.

use crate::ticket::{FlowPlan, TicketType};

use super::params::ValidationError;
use super::{data_repair, mysql_apply, mysql_slave, mysql_switch, tendbcluster_switch};

/// Validate `params` for `ticket_type` and split them into ordered flows.
pub fn plan_flows(
    ticket_type: TicketType,
    params: &serde_json::Value,
) -> Result<Vec<FlowPlan>, ValidationError> {
    let plans = match ticket_type {
        TicketType::MysqlHaApply => mysql_apply::plan(params)?,
        TicketType::MysqlMasterSlaveSwitch | TicketType::MysqlMasterFailOver => {
            mysql_switch::plan(ticket_type, params)?
        }
        TicketType::TendbclusterMasterSlaveSwitch | TicketType::TendbclusterMasterFailOver => {
            tendbcluster_switch::plan(ticket_type, params)?
        }
        TicketType::MysqlAddSlave => mysql_slave::plan_add(params)?,
        TicketType::MysqlReduceSlave => mysql_slave::plan_reduce(params)?,
        TicketType::MysqlDataRepair => data_repair::plan(params)?,
    };

    if plans.is_empty() {
        return Err(ValidationError::Malformed {
            ticket_type,
            reason: "no flows to run".to_string(),
        });
    }
    Ok(plans)
}
