//! Mock pipeline runner for testing.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::pipeline::{NodeStatus, PipelineCallback, PipelineError, PipelineRunner, RunHandle};
use crate::scene::StepGraph;

/// A recorded submission for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedSubmission {
    /// The graph that was submitted.
    pub graph: StepGraph,
    /// Flow context sent along with the graph.
    pub context: serde_json::Value,
}

impl RecordedSubmission {
    /// Overall pipeline report for this submission.
    pub fn report(&self, status: NodeStatus) -> PipelineCallback {
        PipelineCallback {
            execution_id: self.graph.root_id.clone(),
            node_id: self.graph.root_id.clone(),
            status,
            payload: serde_json::Value::Null,
        }
    }

    /// Node level report for the `index`-th node of this submission.
    pub fn node_report(&self, index: usize, status: NodeStatus) -> PipelineCallback {
        PipelineCallback {
            execution_id: self.graph.root_id.clone(),
            node_id: self.graph.nodes[index].id.clone(),
            status,
            payload: serde_json::Value::Null,
        }
    }
}

/// Mock implementation of the PipelineRunner trait.
///
/// Records every submitted graph and accepts it, unless a failure was queued
/// with [`fail_next_submission`](Self::fail_next_submission).
///
/// # Example
///
/// ```rust,ignore
/// use ticketflow_core::testing::MockPipelineRunner;
///
/// let runner = Arc::new(MockPipelineRunner::new());
/// let manager = fixtures::manager(runner.clone(), OrchestratorConfig::default())?;
///
/// manager.create_ticket(request).await?;
/// let submitted = runner.submissions();
/// manager.apply_callback(submitted[0].report(NodeStatus::Finished)).await?;
/// ```
#[derive(Debug, Default)]
pub struct MockPipelineRunner {
    submissions: Mutex<Vec<RecordedSubmission>>,
    failures: Mutex<VecDeque<String>>,
}

impl MockPipelineRunner {
    /// Create a new mock runner that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// All graphs accepted so far, in submission order.
    pub fn submissions(&self) -> Vec<RecordedSubmission> {
        self.submissions
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// The most recent accepted submission.
    pub fn last_submission(&self) -> Option<RecordedSubmission> {
        self.submissions().pop()
    }

    /// Accepted submissions for one root execution id.
    pub fn submissions_for(&self, root_id: &str) -> usize {
        self.submissions()
            .iter()
            .filter(|s| s.graph.root_id == root_id)
            .count()
    }

    /// Reject the next submission with `message`.
    pub fn fail_next_submission(&self, message: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(message.to_string());
        }
    }

    /// Forget recorded submissions.
    pub fn clear(&self) {
        if let Ok(mut submissions) = self.submissions.lock() {
            submissions.clear();
        }
    }
}

#[async_trait]
impl PipelineRunner for MockPipelineRunner {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(
        &self,
        graph: &StepGraph,
        context: &serde_json::Value,
    ) -> Result<RunHandle, PipelineError> {
        let failure = self.failures.lock().ok().and_then(|mut f| f.pop_front());
        if let Some(message) = failure {
            return Err(PipelineError::ConnectionFailed(message));
        }

        if let Ok(mut submissions) = self.submissions.lock() {
            submissions.push(RecordedSubmission {
                graph: graph.clone(),
                context: context.clone(),
            });
        }

        Ok(RunHandle {
            root_id: graph.root_id.clone(),
            runner: self.name().to_string(),
            node_count: graph.nodes.len(),
            submitted_at: Utc::now(),
        })
    }
}
