//! Sync domain: queue, conflicts, breaker, transport seams, orchestrator.

mod audit_log;
mod circuit_breaker;
mod config;
mod conflict_model;
mod engine;
mod network_monitor;
mod queue_model;
mod transport;

pub use audit_log::*;
pub use circuit_breaker::*;
pub use config::*;
pub use conflict_model::*;
pub use engine::*;
pub use network_monitor::*;
pub use queue_model::*;
pub use transport::*;
