//! Step graphs handed to the pipeline runner.

use serde::{Deserialize, Serialize};

/// Atomic remote operation a step graph node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Act {
    /// Verify cluster health and replication before a topology change.
    CheckSwitchPrecondition,
    /// Push the operation's package and scripts to the hosts.
    TransferPackage,
    InstallMysql,
    UninstallMysql,
    /// Restore a fresh backup onto a new instance.
    RestoreBackup,
    /// Point a slave at its master and start replication.
    InitReplication,
    /// Swap master and slave roles of a replication pair.
    SwitchMasterSlave,
    /// Repoint remaining slaves to the new master.
    RepointSlaves,
    /// Swap a remote storage pair behind the spider routing layer.
    SwitchRemotePair,
    /// Reload spider routing to the new remote masters.
    UpdateSpiderRouting,
    AddDomain,
    RemoveDomain,
    /// Persist the new cluster topology.
    UpdateClusterMeta,
    /// Resynchronize inconsistent tables from the master.
    RepairTables,
    /// Re-run checksum on the repaired tables.
    VerifyChecksum,
}

impl Act {
    pub fn as_str(&self) -> &'static str {
        match self {
            Act::CheckSwitchPrecondition => "check_switch_precondition",
            Act::TransferPackage => "transfer_package",
            Act::InstallMysql => "install_mysql",
            Act::UninstallMysql => "uninstall_mysql",
            Act::RestoreBackup => "restore_backup",
            Act::InitReplication => "init_replication",
            Act::SwitchMasterSlave => "switch_master_slave",
            Act::RepointSlaves => "repoint_slaves",
            Act::SwitchRemotePair => "switch_remote_pair",
            Act::UpdateSpiderRouting => "update_spider_routing",
            Act::AddDomain => "add_domain",
            Act::RemoveDomain => "remove_domain",
            Act::UpdateClusterMeta => "update_cluster_meta",
            Act::RepairTables => "repair_tables",
            Act::VerifyChecksum => "verify_checksum",
        }
    }
}

/// One atomic step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepNode {
    /// Unique within the graph; reported back in pipeline callbacks.
    pub id: String,
    /// Human readable step name.
    pub name: String,
    pub act: Act,
    /// Arguments for the act.
    pub kwargs: serde_json::Value,
}

/// Ordering constraint: `to` starts after `from` finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEdge {
    pub from: String,
    pub to: String,
}

/// Directed acyclic graph of steps for one flow invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepGraph {
    /// Root execution id; also the id of the overall pipeline in callbacks.
    pub root_id: String,
    pub name: String,
    pub nodes: Vec<StepNode>,
    pub edges: Vec<StepEdge>,
}

impl StepGraph {
    pub fn node(&self, id: &str) -> Option<&StepNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Ids of the nodes `id` waits on.
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.to == id)
            .map(|e| e.from.as_str())
            .collect()
    }

    /// Nodes with no incoming edge.
    pub fn entry_nodes(&self) -> Vec<&StepNode> {
        self.nodes
            .iter()
            .filter(|n| !self.edges.iter().any(|e| e.to == n.id))
            .collect()
    }

    pub fn acts(&self) -> Vec<Act> {
        self.nodes.iter().map(|n| n.act).collect()
    }
}

/// Builds a [`StepGraph`] stage by stage.
///
/// Each stage waits for every node of the previous stage, so a serial act
/// joins a parallel group and a parallel group fans out from a serial act.
#[derive(Debug)]
pub struct StepGraphBuilder {
    root_id: String,
    name: String,
    nodes: Vec<StepNode>,
    edges: Vec<StepEdge>,
    frontier: Vec<String>,
}

impl StepGraphBuilder {
    pub fn new(root_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            root_id: root_id.into(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            frontier: Vec::new(),
        }
    }

    fn push_node(&mut self, name: String, act: Act, kwargs: serde_json::Value) -> String {
        let id = format!("{}-n{}", self.root_id, self.nodes.len());
        for from in &self.frontier {
            self.edges.push(StepEdge {
                from: from.clone(),
                to: id.clone(),
            });
        }
        self.nodes.push(StepNode {
            id: id.clone(),
            name,
            act,
            kwargs,
        });
        id
    }

    /// Append a serial step.
    pub fn add_act(mut self, name: impl Into<String>, act: Act, kwargs: serde_json::Value) -> Self {
        let id = self.push_node(name.into(), act, kwargs);
        self.frontier = vec![id];
        self
    }

    /// Append a serial step given as a `(name, act, kwargs)` tuple.
    pub fn add_step(self, (name, act, kwargs): (String, Act, serde_json::Value)) -> Self {
        self.add_act(name, act, kwargs)
    }

    /// Append a stage of steps that run concurrently. An empty stage is ignored.
    pub fn add_parallel_acts(mut self, acts: Vec<(String, Act, serde_json::Value)>) -> Self {
        if acts.is_empty() {
            return self;
        }
        let mut stage = Vec::with_capacity(acts.len());
        for (name, act, kwargs) in acts {
            stage.push(self.push_node(name, act, kwargs));
        }
        self.frontier = stage;
        self
    }

    pub fn build(self) -> StepGraph {
        StepGraph {
            root_id: self.root_id,
            name: self.name,
            nodes: self.nodes,
            edges: self.edges,
        }
    }
}
