//! Routing components.
//!
//! - `intent`: heuristic query classification
//! - `strategy`: domain -> loading strategy registry
//! - `loader`: tiered context loading over the phase index
//! - `swarm`: agent gates, route planning and capability gaps
//! - `gaps`: capability-gap ledger and agent recommendations
//! - `routing_log`: suggestion log and acceptance metrics
//! - `hook`: the per-message pipeline tying them together

pub mod gaps;
pub mod hook;
pub mod intent;
pub mod loader;
pub mod routing_log;
pub mod strategy;
pub mod swarm;
