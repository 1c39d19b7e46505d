//! Core ticket data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::exclusive::ExclusiveKey;

/// Operation a ticket asks for. Each type maps to one scene builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketType {
    /// Create new master/slave clusters.
    MysqlHaApply,
    /// Planned master/slave switchover.
    MysqlMasterSlaveSwitch,
    /// Switch away from a dead master.
    MysqlMasterFailOver,
    /// Switchover of TenDB Cluster remote storage pairs.
    TendbclusterMasterSlaveSwitch,
    /// Forced failover of TenDB Cluster remote storage pairs.
    TendbclusterMasterFailOver,
    /// Add a slave to an existing cluster.
    MysqlAddSlave,
    /// Remove a slave from an existing cluster.
    MysqlReduceSlave,
    /// Repair inconsistent data found by checksum.
    MysqlDataRepair,
}

impl TicketType {
    pub const ALL: [TicketType; 8] = [
        TicketType::MysqlHaApply,
        TicketType::MysqlMasterSlaveSwitch,
        TicketType::MysqlMasterFailOver,
        TicketType::TendbclusterMasterSlaveSwitch,
        TicketType::TendbclusterMasterFailOver,
        TicketType::MysqlAddSlave,
        TicketType::MysqlReduceSlave,
        TicketType::MysqlDataRepair,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketType::MysqlHaApply => "MYSQL_HA_APPLY",
            TicketType::MysqlMasterSlaveSwitch => "MYSQL_MASTER_SLAVE_SWITCH",
            TicketType::MysqlMasterFailOver => "MYSQL_MASTER_FAIL_OVER",
            TicketType::TendbclusterMasterSlaveSwitch => "TENDBCLUSTER_MASTER_SLAVE_SWITCH",
            TicketType::TendbclusterMasterFailOver => "TENDBCLUSTER_MASTER_FAIL_OVER",
            TicketType::MysqlAddSlave => "MYSQL_ADD_SLAVE",
            TicketType::MysqlReduceSlave => "MYSQL_REDUCE_SLAVE",
            TicketType::MysqlDataRepair => "MYSQL_DATA_REPAIR",
        }
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TicketType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown ticket type: {}", s))
    }
}

/// User-visible ticket status.
///
/// `Finished`, `Revoked` and `Terminated` are absorbing: once reached, no
/// flow-driven transition may leave them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Running,
    Finished,
    Revoked,
    Terminated,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 4] = [
        TicketStatus::Running,
        TicketStatus::Finished,
        TicketStatus::Revoked,
        TicketStatus::Terminated,
    ];

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TicketStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Running => "RUNNING",
            TicketStatus::Finished => "FINISHED",
            TicketStatus::Revoked => "REVOKED",
            TicketStatus::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TicketStatus::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown ticket status: {}", s))
    }
}

/// A change request and its execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Unique identifier (UUID).
    pub id: String,
    /// Requested operation.
    pub ticket_type: TicketType,
    /// Who submitted the ticket.
    pub creator: String,
    /// Submitted parameters, operation specific.
    pub params: serde_json::Value,
    /// Current status, derived from the flows.
    pub status: TicketStatus,
    /// Resources touched by the ticket, in flow order.
    pub scope: Vec<ExclusiveKey>,
    /// Owned flows, ordered by ordinal then attempt.
    pub flow_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// Whether the ticket touches `key`.
    pub fn covers(&self, key: &ExclusiveKey) -> bool {
        self.scope.contains(key)
    }
}
