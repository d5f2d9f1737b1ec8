//! Placement oracle: the cluster resource view plus a placement strategy

use std::collections::VecDeque;

use nodesched_core::{NodeId, NodeschedResult, ResourceSet, SchedulingStrategy};
use tracing::{debug, warn};

use crate::placement::{
    DefaultPlacementStrategy, PlacementDecision, PlacementHints, PlacementRequest,
    PlacementStrategy,
};
use crate::resource_view::ClusterResourceView;

/// A spillback charged against a remote node's view entry
#[derive(Debug, Clone)]
struct RemoteCharge {
    node_id: NodeId,
    shape: ResourceSet,
    charged_at_ms: i64,
}

/// Owns the resource view and answers where a shape should run
///
/// Only the local node's usage is tracked exactly. Charges against remote
/// nodes are provisional: they are dropped when the node reports its own
/// resources, or when they outlive the configured TTL.
pub struct ClusterResourceScheduler {
    local_node_id: NodeId,
    view: ClusterResourceView,
    strategy: Box<dyn PlacementStrategy>,
    remote_charges: VecDeque<RemoteCharge>,
}

impl ClusterResourceScheduler {
    /// Create a scheduler whose view contains only the local node
    pub fn new(
        local_node_id: NodeId,
        local_total: ResourceSet,
        strategy: Box<dyn PlacementStrategy>,
    ) -> Self {
        let mut view = ClusterResourceView::new();
        view.add_or_update_node(local_node_id, local_total);
        Self {
            local_node_id,
            view,
            strategy,
            remote_charges: VecDeque::new(),
        }
    }

    /// Create a scheduler using [`DefaultPlacementStrategy`]
    pub fn with_default_strategy(
        local_node_id: NodeId,
        local_total: ResourceSet,
        spread_threshold: f64,
    ) -> Self {
        Self::new(
            local_node_id,
            local_total,
            Box::new(DefaultPlacementStrategy::new(spread_threshold)),
        )
    }

    /// Id of the node this scheduler runs on
    pub fn local_node_id(&self) -> NodeId {
        self.local_node_id
    }

    /// Pick where `shape` should run
    pub fn get_best_schedulable_node(
        &mut self,
        shape: &ResourceSet,
        strategy: &SchedulingStrategy,
        hints: &PlacementHints,
    ) -> PlacementDecision {
        let request = PlacementRequest {
            shape,
            strategy,
            hints,
            local_node_id: self.local_node_id,
        };
        let decision = self.strategy.place(&request, &self.view);
        debug!(resources = %shape, ?decision, "Placement decision");
        decision
    }

    /// Charge a local lease against the local node
    pub fn allocate_local_task_resources(&mut self, shape: &ResourceSet) -> NodeschedResult<()> {
        self.view.allocate(&self.local_node_id, shape)
    }

    /// Return a finished local lease to the local node
    pub fn release_local_task_resources(&mut self, shape: &ResourceSet) -> NodeschedResult<()> {
        self.view.release(&self.local_node_id, shape)
    }

    /// Charge a spilled-back task against a remote node until its next report
    pub fn allocate_remote_task_resources(
        &mut self,
        node_id: &NodeId,
        shape: &ResourceSet,
        now_ms: i64,
    ) -> NodeschedResult<()> {
        self.view.allocate(node_id, shape)?;
        self.remote_charges.push_back(RemoteCharge {
            node_id: *node_id,
            shape: shape.clone(),
            charged_at_ms: now_ms,
        });
        Ok(())
    }

    /// Release remote charges older than `ttl_ms`; 0 keeps them
    ///
    /// Returns how many charges were released.
    pub fn expire_remote_charges(&mut self, now_ms: i64, ttl_ms: u64) -> usize {
        if ttl_ms == 0 {
            return 0;
        }
        let ttl = i64::try_from(ttl_ms).unwrap_or(i64::MAX);
        let mut expired = 0;
        while let Some(charge) = self.remote_charges.front() {
            if now_ms.saturating_sub(charge.charged_at_ms) < ttl {
                break;
            }
            let Some(charge) = self.remote_charges.pop_front() else {
                break;
            };
            if let Err(e) = self.view.release(&charge.node_id, &charge.shape) {
                warn!(node_id = %charge.node_id, error = %e, "Dropping stale remote charge");
            }
            expired += 1;
        }
        if expired > 0 {
            debug!(expired, "Expired remote charges");
        }
        expired
    }

    /// Number of outstanding remote charges
    pub fn num_remote_charges(&self) -> usize {
        self.remote_charges.len()
    }

    /// Apply a node's resource report
    ///
    /// A remote node's report supersedes any charges made here; `available`
    /// defaults to the whole of `total`. For the local node only `total` is
    /// taken, since its usage is tracked exactly by local leases.
    pub fn update_node_resources(
        &mut self,
        node_id: NodeId,
        total: ResourceSet,
        available: Option<ResourceSet>,
    ) {
        if node_id == self.local_node_id {
            self.view.add_or_update_node(node_id, total);
            return;
        }
        self.remote_charges.retain(|charge| charge.node_id != node_id);
        self.view.report_node(node_id, total, available);
    }

    /// Forget a node and any charges against it
    pub fn remove_node(&mut self, node_id: &NodeId) -> bool {
        self.remote_charges.retain(|charge| charge.node_id != *node_id);
        self.view.remove_node(node_id)
    }

    /// Resource view
    pub fn view(&self) -> &ClusterResourceView {
        &self.view
    }

    /// Mutable resource view, for heartbeat processing
    pub fn view_mut(&mut self) -> &mut ClusterResourceView {
        &mut self.view
    }
}

impl std::fmt::Debug for ClusterResourceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterResourceScheduler")
            .field("local_node_id", &self.local_node_id)
            .field("view", &self.view)
            .field("remote_charges", &self.remote_charges.len())
            .finish()
    }
}
