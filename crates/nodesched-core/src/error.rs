//! Error types for nodesched

use thiserror::Error;

/// Main error type for nodesched
#[derive(Error, Debug)]
pub enum NodeschedError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Event loop error (loop stopped, not running inside a tokio runtime)
    #[error("Event loop error: {0}")]
    EventLoop(String),

    /// API error
    #[error("API error: {0}")]
    Api(String),

    /// Node not found in the cluster resource view
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Task not found
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Resource exhausted
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Invalid resource specification
    #[error("Invalid resources: {0}")]
    InvalidResources(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for nodesched operations
pub type NodeschedResult<T> = Result<T, NodeschedError>;

impl From<toml::de::Error> for NodeschedError {
    fn from(err: toml::de::Error) -> Self {
        NodeschedError::Config(err.to_string())
    }
}
