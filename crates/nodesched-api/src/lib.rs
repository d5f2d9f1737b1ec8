//! nodesched-api: REST API server for nodesched
//!
//! This crate exposes the cluster task manager over HTTP:
//! - Lease requests, returns and cancellation
//! - Node membership and drain updates
//! - Status, resource usage reports and debug output

pub mod directory;
pub mod rest;

pub use directory::NodeDirectory;
pub use rest::{create_router, AppState};
