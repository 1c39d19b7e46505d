pub mod audit;
pub mod handlers;
pub mod middleware;
pub mod orchestrator;
pub mod pipeline;
pub mod routes;
pub mod tickets;

pub use routes::create_router;
