//! Node placement decisions

use nodesched_core::{NodeId, ResourceSet, SchedulingStrategy};

use crate::resource_view::{ClusterResourceView, NodeResources};

/// Where a task should run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementDecision {
    /// Run on the local node
    Local,
    /// Spill back to another node
    Remote(NodeId),
    /// Some node could run it, but none has capacity right now
    Wait,
    /// No node in the cluster could ever run it
    Infeasible,
}

/// Per-request inputs to placement beyond the shape and strategy
#[derive(Debug, Clone, Copy, Default)]
pub struct PlacementHints {
    /// Grant locally or reject; never spill back
    pub grant_or_reject: bool,
    /// The requester chose this node for data locality
    pub locality_preferred: bool,
    /// Node holding the task's arguments
    pub preferred_node: Option<NodeId>,
}

/// A placement request
#[derive(Debug, Clone, Copy)]
pub struct PlacementRequest<'a> {
    /// Resource shape
    pub shape: &'a ResourceSet,
    /// Placement constraint
    pub strategy: &'a SchedulingStrategy,
    /// Request hints
    pub hints: &'a PlacementHints,
    /// Node this scheduler runs on
    pub local_node_id: NodeId,
}

/// Strategy for making placement decisions
pub trait PlacementStrategy: Send {
    /// Pick a node for a request
    fn place(
        &mut self,
        request: &PlacementRequest<'_>,
        view: &ClusterResourceView,
    ) -> PlacementDecision;
}

/// Hybrid pack-then-spread placement
///
/// The local node is preferred while its utilization stays below
/// `spread_threshold`; past that the least utilized available node wins.
/// `Spread` tasks rotate over every available node. `NodeLabel` tasks apply
/// the same pack-then-spread rule to the nodes carrying the label.
#[derive(Debug)]
pub struct DefaultPlacementStrategy {
    spread_threshold: f64,
    spread_cursor: usize,
}

impl DefaultPlacementStrategy {
    /// Create a strategy with the given local-node utilization threshold
    pub fn new(spread_threshold: f64) -> Self {
        Self {
            spread_threshold,
            spread_cursor: 0,
        }
    }

    fn decide(&self, local: NodeId, hybrid: Option<NodeId>) -> PlacementDecision {
        match hybrid {
            Some(node_id) if node_id == local => PlacementDecision::Local,
            Some(node_id) => PlacementDecision::Remote(node_id),
            None => PlacementDecision::Wait,
        }
    }

    fn hybrid(
        &self,
        request: &PlacementRequest<'_>,
        view: &ClusterResourceView,
        eligible: &dyn Fn(&NodeResources) -> bool,
    ) -> Option<NodeId> {
        let usable = |node: &NodeResources| {
            !node.draining && eligible(node) && node.is_available(request.shape)
        };
        let local = request.local_node_id;
        if let Some(node) = view.node(&local) {
            if usable(node) {
                let below_threshold =
                    node.critical_utilization(Some(request.shape)) <= self.spread_threshold;
                let hinted = request.hints.locality_preferred || request.hints.grant_or_reject;
                if hinted || below_threshold {
                    return Some(local);
                }
            }
        }

        if let Some(preferred) = request.hints.preferred_node {
            if let Some(node) = view.node(&preferred) {
                if usable(node) {
                    return Some(preferred);
                }
            }
        }

        // Least utilized wins; the local node wins ties, then node-id order.
        let mut best: Option<(NodeId, f64)> = None;
        for (node_id, node) in view.nodes() {
            if !usable(node) {
                continue;
            }
            let utilization = node.critical_utilization(Some(request.shape));
            let better = match best {
                None => true,
                Some((best_id, best_util)) => {
                    utilization < best_util
                        || (utilization == best_util && *node_id == local && best_id != local)
                }
            };
            if better {
                best = Some((*node_id, utilization));
            }
        }
        best.map(|(node_id, _)| node_id)
    }

    fn spread(
        &mut self,
        request: &PlacementRequest<'_>,
        view: &ClusterResourceView,
    ) -> Option<NodeId> {
        let available: Vec<NodeId> = view
            .nodes()
            .filter(|(_, node)| !node.draining && node.is_available(request.shape))
            .map(|(node_id, _)| *node_id)
            .collect();
        if available.is_empty() {
            return None;
        }
        let chosen = available[self.spread_cursor % available.len()];
        self.spread_cursor = self.spread_cursor.wrapping_add(1);
        Some(chosen)
    }
}

impl Default for DefaultPlacementStrategy {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl PlacementStrategy for DefaultPlacementStrategy {
    fn place(
        &mut self,
        request: &PlacementRequest<'_>,
        view: &ClusterResourceView,
    ) -> PlacementDecision {
        let local = request.local_node_id;

        if let SchedulingStrategy::NodeAffinity { node_id, soft } = request.strategy {
            let usable = view
                .node(node_id)
                .filter(|node| !node.draining && node.is_feasible(request.shape));
            match usable {
                Some(node) if node.is_available(request.shape) => {
                    return self.decide(local, Some(*node_id));
                }
                Some(_) if !soft => return PlacementDecision::Wait,
                None if !soft => return PlacementDecision::Infeasible,
                _ => {}
            }
        }

        if let SchedulingStrategy::NodeLabel { key, value, soft } = request.strategy {
            let labelled = |node: &NodeResources| node.has_label(key, value);
            let feasible = view.nodes().any(|(_, node)| {
                !node.draining && labelled(node) && node.is_feasible(request.shape)
            });
            if feasible {
                if let Some(node_id) = self.hybrid(request, view, &labelled) {
                    return self.decide(local, Some(node_id));
                }
                if !soft {
                    return PlacementDecision::Wait;
                }
            } else if !soft {
                return PlacementDecision::Infeasible;
            }
        }

        if !view.any_feasible(request.shape) {
            return PlacementDecision::Infeasible;
        }

        let chosen = match request.strategy {
            SchedulingStrategy::Spread => self.spread(request, view),
            _ => self.hybrid(request, view, &|_| true),
        };
        self.decide(local, chosen)
    }
}
