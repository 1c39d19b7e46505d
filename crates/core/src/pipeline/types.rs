//! Types shared with the external pipeline runner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scene::StepGraph;

/// Errors that can occur while submitting work to a pipeline runner.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Pipeline rejected submission: {0}")]
    Rejected(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Request timeout")]
    Timeout,
}

/// Acknowledgement of a submitted step graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHandle {
    pub root_id: String,
    /// Name of the runner that accepted the graph.
    pub runner: String,
    pub node_count: usize,
    pub submitted_at: DateTime<Utc>,
}

/// Status reported by the runner for a node or for the whole pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Running,
    Finished,
    Failed,
    Revoked,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NodeStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Running => "RUNNING",
            NodeStatus::Finished => "FINISHED",
            NodeStatus::Failed => "FAILED",
            NodeStatus::Revoked => "REVOKED",
        }
    }
}

/// Status report posted back by the pipeline runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineCallback {
    /// Root execution id of the flow's pipeline.
    pub execution_id: String,
    /// Reporting node. Equal to `execution_id` for the overall pipeline.
    pub node_id: String,
    pub status: NodeStatus,
    /// Error detail for failures, updated context for a finished pipeline.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl PipelineCallback {
    /// Whether this reports the whole pipeline rather than a single node.
    pub fn is_overall(&self) -> bool {
        self.node_id == self.execution_id
    }

    /// Human readable failure detail carried in the payload.
    pub fn detail(&self) -> String {
        match &self.payload {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Object(map) => map
                .get("error")
                .or_else(|| map.get("detail"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| self.payload.to_string()),
            serde_json::Value::Null => format!("node {} reported {}", self.node_id, self.status.as_str()),
            other => other.to_string(),
        }
    }
}

/// Executes step graphs. Implemented outside this crate; the engine only submits.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    /// Runner name for logging/audit.
    fn name(&self) -> &str;

    /// Start executing `graph`. Progress arrives later as [`PipelineCallback`]s.
    async fn submit(
        &self,
        graph: &StepGraph,
        context: &serde_json::Value,
    ) -> Result<RunHandle, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn callback(node_id: &str, payload: serde_json::Value) -> PipelineCallback {
        PipelineCallback {
            execution_id: "root".to_string(),
            node_id: node_id.to_string(),
            status: NodeStatus::Failed,
            payload,
        }
    }

    #[test]
    fn test_overall_callback() {
        assert!(callback("root", json!(null)).is_overall());
        assert!(!callback("root-n1", json!(null)).is_overall());
    }

    #[test]
    fn test_detail_extraction() {
        assert_eq!(callback("n", json!({"error": "disk full"})).detail(), "disk full");
        assert_eq!(callback("n", json!("timeout")).detail(), "timeout");
        assert_eq!(callback("n", json!(null)).detail(), "node n reported FAILED");
    }

    #[test]
    fn test_callback_deserializes_without_payload() {
        let cb: PipelineCallback = serde_json::from_value(json!({
            "execution_id": "abc",
            "node_id": "abc",
            "status": "FINISHED"
        }))
        .unwrap();
        assert_eq!(cb.status, NodeStatus::Finished);
        assert!(cb.payload.is_null());
    }
}
