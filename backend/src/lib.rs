//! Agent orchestration and document retrieval services.

pub mod agents;
pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod retrieval;
