//! Cluster resource view: per-node total and available resources

use nodesched_core::{NodeId, NodeschedError, NodeschedResult, ResourceSet};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Resources of one node as seen by this scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct NodeResources {
    /// Total capacity
    pub total: ResourceSet,
    /// Currently unallocated capacity
    pub available: ResourceSet,
    /// Node labels
    pub labels: BTreeMap<String, String>,
    /// Node is being drained and takes no new work
    pub draining: bool,
}

impl NodeResources {
    /// Fresh node with everything available
    pub fn new(total: ResourceSet) -> Self {
        Self {
            available: total.clone(),
            total,
            labels: BTreeMap::new(),
            draining: false,
        }
    }

    /// Whether the node could ever run `shape`
    pub fn is_feasible(&self, shape: &ResourceSet) -> bool {
        shape.is_subset_of(&self.total)
    }

    /// Whether the node can run `shape` right now
    pub fn is_available(&self, shape: &ResourceSet) -> bool {
        shape.is_subset_of(&self.available)
    }

    /// Whether the node carries label `key=value`
    pub fn has_label(&self, key: &str, value: &str) -> bool {
        self.labels.get(key).is_some_and(|v| v == value)
    }

    /// Highest utilization ratio over all resources, counting `extra` as used
    pub fn critical_utilization(&self, extra: Option<&ResourceSet>) -> f64 {
        self.total
            .iter()
            .filter(|(_, total)| !total.is_zero())
            .map(|(name, total)| {
                let used = total.to_f64() - self.available.get(name).to_f64();
                let extra = extra.map_or(0.0, |e| e.get(name).to_f64());
                (used + extra) / total.to_f64()
            })
            .fold(0.0, f64::max)
    }
}

/// Resource view of every known node, keyed by node id
#[derive(Debug, Default)]
pub struct ClusterResourceView {
    nodes: BTreeMap<NodeId, NodeResources>,
}

impl ClusterResourceView {
    /// Create an empty view
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, or update the capacity of a known one keeping its usage
    pub fn add_or_update_node(&mut self, node_id: NodeId, total: ResourceSet) {
        match self.nodes.get_mut(&node_id) {
            Some(node) => {
                let mut used = node.total.clone();
                used.subtract_saturating(&node.available);
                let mut available = total.clone();
                available.subtract_saturating(&used);
                node.total = total;
                node.available = available;
                debug!(node_id = %node_id, total = %node.total, "Updated node resources");
            }
            None => {
                info!(node_id = %node_id, total = %total, "Node added to resource view");
                self.nodes.insert(node_id, NodeResources::new(total));
            }
        }
    }

    /// Apply a node's own resource report
    ///
    /// Replaces whatever usage was tracked here: `available` defaults to the
    /// whole of `total`. Labels and drain state are kept.
    pub fn report_node(
        &mut self,
        node_id: NodeId,
        total: ResourceSet,
        available: Option<ResourceSet>,
    ) {
        let available = available.unwrap_or_else(|| total.clone());
        let node = self
            .nodes
            .entry(node_id)
            .or_insert_with(|| NodeResources::new(total.clone()));
        node.total = total;
        node.available = available;
        debug!(
            node_id = %node_id,
            total = %node.total,
            available = %node.available,
            "Node resources reported"
        );
    }

    /// Set labels of a node
    pub fn set_node_labels(
        &mut self,
        node_id: &NodeId,
        labels: BTreeMap<String, String>,
    ) -> NodeschedResult<()> {
        self.node_mut(node_id)?.labels = labels;
        Ok(())
    }

    /// Mark a node as draining (or not)
    pub fn set_node_draining(&mut self, node_id: &NodeId, draining: bool) -> NodeschedResult<()> {
        self.node_mut(node_id)?.draining = draining;
        info!(node_id = %node_id, draining, "Node drain state changed");
        Ok(())
    }

    /// Remove a node; returns whether it was known
    pub fn remove_node(&mut self, node_id: &NodeId) -> bool {
        let removed = self.nodes.remove(node_id).is_some();
        if removed {
            info!(node_id = %node_id, "Node removed from resource view");
        }
        removed
    }

    /// Resources of a node
    pub fn node(&self, node_id: &NodeId) -> Option<&NodeResources> {
        self.nodes.get(node_id)
    }

    fn node_mut(&mut self, node_id: &NodeId) -> NodeschedResult<&mut NodeResources> {
        self.nodes
            .get_mut(node_id)
            .ok_or_else(|| NodeschedError::NodeNotFound(node_id.to_string()))
    }

    /// Iterate over nodes in node-id order
    pub fn nodes(&self) -> impl Iterator<Item = (&NodeId, &NodeResources)> {
        self.nodes.iter()
    }

    /// Number of known nodes
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Whether any schedulable node could ever run `shape`
    pub fn any_feasible(&self, shape: &ResourceSet) -> bool {
        self.nodes
            .values()
            .any(|node| !node.draining && node.is_feasible(shape))
    }

    /// Allocate `shape` on a node
    pub fn allocate(&mut self, node_id: &NodeId, shape: &ResourceSet) -> NodeschedResult<()> {
        let node = self.node_mut(node_id)?;
        if !node.is_available(shape) {
            return Err(NodeschedError::ResourceExhausted(format!(
                "Not enough resources on node {}: requested {}, available {}",
                node_id, shape, node.available
            )));
        }
        node.available.subtract_saturating(shape);
        debug!(node_id = %node_id, resources = %shape, "Allocated resources");
        Ok(())
    }

    /// Return previously allocated `shape` to a node, capped at its total
    pub fn release(&mut self, node_id: &NodeId, shape: &ResourceSet) -> NodeschedResult<()> {
        let node = self.node_mut(node_id)?;
        node.available.add(shape);
        for (name, total) in node.total.iter() {
            if node.available.get(name) > total {
                node.available.set(name, total);
            }
        }
        // Resources the node no longer has are dropped entirely.
        let stale: Vec<String> = node
            .available
            .iter()
            .filter(|(name, _)| node.total.get(name).is_zero())
            .map(|(name, _)| name.to_string())
            .collect();
        for name in stale {
            node.available.set(&name, Default::default());
        }
        debug!(node_id = %node_id, resources = %shape, "Released resources");
        Ok(())
    }
}
