//! Node address directory shared between the HTTP layer and the scheduler

use nodesched_core::{NodeId, NodeInfo};
use nodesched_scheduler::NodeInfoGetter;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Addresses of known nodes, used for spillback replies
#[derive(Debug, Clone, Default)]
pub struct NodeDirectory {
    nodes: Arc<RwLock<HashMap<NodeId, NodeInfo>>>,
}

impl NodeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node's address
    pub fn upsert(&self, info: NodeInfo) {
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        nodes.insert(info.node_id, info);
    }

    /// Forget a node; returns its last known address
    pub fn remove(&self, node_id: &NodeId) -> Option<NodeInfo> {
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        nodes.remove(node_id)
    }

    pub fn get(&self, node_id: &NodeId) -> Option<NodeInfo> {
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        nodes.get(node_id).cloned()
    }
}

impl NodeInfoGetter for NodeDirectory {
    fn get_node_info(&self, node_id: &NodeId) -> Option<NodeInfo> {
        self.get(node_id)
    }
}
