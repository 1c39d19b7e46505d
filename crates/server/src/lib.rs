//! HTTP surface of the ticket flow daemon.
//!
//! Exposed as a library so integration tests can build the router in-process.

pub mod api;
pub mod metrics;
pub mod state;
