//! Boundary to the external pipeline runner.
//!
//! The engine submits one [`StepGraph`](crate::scene::StepGraph) per flow
//! invocation and learns about progress through [`PipelineCallback`]s.

mod http;
mod types;

pub use http::HttpPipelineRunner;
pub use types::*;
