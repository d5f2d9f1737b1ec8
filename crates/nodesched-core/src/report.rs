//! Resource usage report structures sent to the cluster control plane

use serde::{Deserialize, Serialize};

use crate::ids::NodeId;
use crate::resources::ResourceSet;

/// Queued demand for one resource shape
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDemand {
    /// The resource shape requested by each queued task
    pub shape: ResourceSet,
    /// Requests waiting for resources that some node can provide
    pub num_ready_requests_queued: u64,
    /// Requests no node in the cluster can currently satisfy
    pub num_infeasible_requests_queued: u64,
}

impl ResourceDemand {
    /// Total number of queued requests for this shape
    pub fn total_queued(&self) -> u64 {
        self.num_ready_requests_queued + self.num_infeasible_requests_queued
    }
}

/// Resource usage section of a node heartbeat
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcesData {
    /// Reporting node
    pub node_id: NodeId,
    /// Aggregate queued demand (shape times count, summed)
    pub resource_load: ResourceSet,
    /// Queued demand per shape
    pub resource_load_by_shape: Vec<ResourceDemand>,
}

impl ResourcesData {
    /// Empty report for a node
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }
}

/// Counters filled by pending-task diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTaskCounters {
    /// Pending actor creation tasks
    pub num_pending_actor_creation: u64,
    /// Pending normal tasks
    pub num_pending_tasks: u64,
}
