//! nodesched-core: Core types for the nodesched cluster task scheduler
//!
//! This crate provides the fundamental types used throughout nodesched:
//! - Task, worker and node identifiers
//! - Resource sets and task descriptions
//! - The lease reply contract and heartbeat report structures
//! - Configuration types
//! - Error handling

pub mod config;
pub mod error;
pub mod ids;
pub mod node;
pub mod reply;
pub mod report;
pub mod resources;
pub mod task;

pub use config::*;
pub use error::*;
pub use ids::*;
pub use node::*;
pub use reply::*;
pub use report::*;
pub use resources::{FixedPoint, ResourceSet, CPU, GPU};
pub use task::*;
