//! Configuration types for nodesched

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{NodeschedError, NodeschedResult};
use crate::ids::NodeId;
use crate::node::NodeInfo;
use crate::resources::ResourceSet;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// API server configuration
    pub api: ApiConfig,
    /// Scheduler tuning
    pub scheduler: SchedulerConfig,
    /// Static cluster layout
    pub cluster: ClusterConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> NodeschedResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeschedError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> NodeschedResult<Self> {
        toml::from_str(content)
            .map_err(|e| NodeschedError::Config(format!("Failed to parse config: {}", e)))
    }
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind the HTTP server
    pub address: String,
    /// Port for the HTTP server
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 9190,
        }
    }
}

/// Scheduler tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of shapes in `resource_load_by_shape`
    pub max_resource_shapes_per_load_report: usize,
    /// Period of the scheduling pass that re-evaluates infeasible work
    pub infeasible_retry_interval_ms: u64,
    /// Period of the debug state dump (0 disables it)
    pub debug_dump_interval_ms: u64,
    /// Period of metric recording (0 disables it)
    pub metrics_report_interval_ms: u64,
    /// Local utilization below which the default policy keeps work local
    pub spread_threshold: f64,
    /// How long a spillback charge against a remote node is held before the
    /// node is trusted to report it (0 keeps charges until the next report)
    pub remote_charge_ttl_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_resource_shapes_per_load_report: 100,
            infeasible_retry_interval_ms: 1000,
            debug_dump_interval_ms: 10_000,
            metrics_report_interval_ms: 10_000,
            spread_threshold: 0.5,
            remote_charge_ttl_ms: 2000,
        }
    }
}

/// A node entry in the static cluster layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identifier; generated when omitted
    pub node_id: Option<Uuid>,
    /// Host address
    pub address: String,
    /// Scheduler port
    pub port: u16,
    /// Total resources of the node
    #[serde(default)]
    pub resources: BTreeMap<String, f64>,
    /// Node labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl NodeConfig {
    /// Resolve the node identifier
    pub fn resolve_id(&self) -> NodeId {
        self.node_id.map(NodeId::from).unwrap_or_default()
    }

    /// Parse the configured resources
    pub fn resource_set(&self) -> NodeschedResult<ResourceSet> {
        ResourceSet::try_from_map(&self.resources)
    }

    /// Node info for the given resolved id
    pub fn node_info(&self, node_id: NodeId) -> NodeInfo {
        NodeInfo::new(node_id, self.address.clone(), self.port)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        let mut resources = BTreeMap::new();
        resources.insert(crate::resources::CPU.to_string(), 4.0);
        Self {
            node_id: None,
            address: "127.0.0.1".to_string(),
            port: 9190,
            resources,
            labels: BTreeMap::new(),
        }
    }
}

/// Static cluster layout: the local node plus known peers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// The node this scheduler runs on
    pub local_node: NodeConfig,
    /// Peer nodes known at startup
    pub nodes: Vec<NodeConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive
    pub level: String,
    /// Log format (json or text)
    pub format: String,
    /// Log file path (if any)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            file: None,
        }
    }
}
