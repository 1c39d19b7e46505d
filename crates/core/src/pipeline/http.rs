//! Pipeline runner reached over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::scene::StepGraph;

use super::{PipelineError, PipelineRunner, RunHandle};

#[derive(Serialize)]
struct SubmitRequest<'a> {
    root_id: &'a str,
    graph: &'a StepGraph,
    context: &'a serde_json::Value,
}

/// Submits step graphs to `POST <url>/pipelines`.
pub struct HttpPipelineRunner {
    client: Client,
    config: PipelineConfig,
}

impl HttpPipelineRunner {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| PipelineError::ConnectionFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }
}

#[async_trait]
impl PipelineRunner for HttpPipelineRunner {
    fn name(&self) -> &str {
        "http"
    }

    async fn submit(
        &self,
        graph: &StepGraph,
        context: &serde_json::Value,
    ) -> Result<RunHandle, PipelineError> {
        let url = format!("{}/pipelines", self.base_url());
        let body = SubmitRequest {
            root_id: &graph.root_id,
            graph,
            context,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::Timeout
                } else if e.is_connect() {
                    PipelineError::ConnectionFailed(e.to_string())
                } else {
                    PipelineError::ApiError(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(root_id = %graph.root_id, nodes = graph.nodes.len(), "Pipeline accepted graph");
            return Ok(RunHandle {
                root_id: graph.root_id.clone(),
                runner: self.name().to_string(),
                node_count: graph.nodes.len(),
                submitted_at: Utc::now(),
            });
        }

        let text = response.text().await.unwrap_or_default();
        let snippet: String = text.chars().take(200).collect();
        warn!(root_id = %graph.root_id, status = %status, "Pipeline refused graph");

        if status.is_client_error() {
            Err(PipelineError::Rejected(format!("{}: {}", status, snippet)))
        } else {
            Err(PipelineError::ApiError(format!("{}: {}", status, snippet)))
        }
    }
}
