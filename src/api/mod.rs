//! HTTP API Module
//!
//! Serves the published map, health/status endpoints, and metrics.

mod metrics;
mod routes;

pub use metrics::Metrics;
pub use routes::{router, run_api_server, ApiState};
