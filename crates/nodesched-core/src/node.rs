//! Node metadata

use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

/// Addressing information for a cluster node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node identifier
    pub node_id: NodeId,
    /// Host address of the node's scheduler
    pub address: String,
    /// Port of the node's scheduler
    pub port: u16,
}

impl NodeInfo {
    /// Create node info
    pub fn new(node_id: NodeId, address: impl Into<String>, port: u16) -> Self {
        Self {
            node_id,
            address: address.into(),
            port,
        }
    }

    /// `address:port` form
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
