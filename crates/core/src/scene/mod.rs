//! Scene builders: one per ticket type.
//!
//! A scene validates ticket parameters, splits them into per-resource flows
//! and turns each flow's context into a [`StepGraph`]. The
//! [`SceneController`] is the only entry point the orchestrator uses to start
//! work on the pipeline runner.

mod controller;
mod data_repair;
mod graph;
mod mysql_apply;
mod mysql_slave;
mod mysql_switch;
mod params;
mod plan;
mod tendbcluster_switch;

pub use controller::{build_graph, SceneController, SceneError};
pub use data_repair::{DataRepairParams, RepairTable, RepairTrigger};
pub use graph::{Act, StepEdge, StepGraph, StepGraphBuilder, StepNode};
pub use mysql_slave::BackupSource;
pub use mysql_switch::SwitchMode;
pub use params::ValidationError;
pub use plan::plan_flows;
