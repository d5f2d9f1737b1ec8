//! Task description types

use serde::{Deserialize, Serialize};

use crate::ids::{NodeId, TaskId, WorkerId};
use crate::resources::ResourceSet;

/// Kind of task carried by a lease request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Regular stateless task
    #[default]
    Normal,
    /// Task that creates an actor
    ActorCreation,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Normal => write!(f, "normal"),
            TaskKind::ActorCreation => write!(f, "actor_creation"),
        }
    }
}

/// Placement constraint requested by the task
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulingStrategy {
    /// Pack onto the local node until it is busy, then the least utilized node
    #[default]
    Default,
    /// Spread tasks across all nodes with capacity
    Spread,
    /// Pin to a specific node; `soft` allows falling back to the default policy
    NodeAffinity { node_id: NodeId, soft: bool },
    /// Only nodes labelled `key=value`; `soft` prefers them but allows any node
    NodeLabel {
        key: String,
        value: String,
        soft: bool,
    },
}

/// Immutable description of a task requesting a worker lease
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub task_id: TaskId,
    /// Function descriptor (e.g. `module.fn`)
    pub name: String,
    /// Worker that submitted the task
    pub owner_worker_id: WorkerId,
    /// Node the owner runs on
    pub owner_node_id: NodeId,
    /// Resources required to run the task
    pub required_resources: ResourceSet,
    /// Task kind
    pub kind: TaskKind,
    /// Placement constraint
    pub scheduling_strategy: SchedulingStrategy,
    /// Nesting depth of the submitting call chain
    pub depth: u32,
    /// Node holding most of the task's arguments, if known
    pub locality_hint: Option<NodeId>,
}

impl Task {
    /// Create a normal task with default placement
    pub fn new(name: impl Into<String>, required_resources: ResourceSet) -> Self {
        Self {
            task_id: TaskId::new(),
            name: name.into(),
            owner_worker_id: WorkerId::nil(),
            owner_node_id: NodeId::nil(),
            required_resources,
            kind: TaskKind::Normal,
            scheduling_strategy: SchedulingStrategy::Default,
            depth: 0,
            locality_hint: None,
        }
    }

    /// Set the owner of the task
    pub fn with_owner(mut self, worker_id: WorkerId, node_id: NodeId) -> Self {
        self.owner_worker_id = worker_id;
        self.owner_node_id = node_id;
        self
    }

    /// Set the task kind
    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the scheduling strategy
    pub fn with_strategy(mut self, strategy: SchedulingStrategy) -> Self {
        self.scheduling_strategy = strategy;
        self
    }

    /// Whether this task creates an actor
    pub fn is_actor_creation(&self) -> bool {
        self.kind == TaskKind::ActorCreation
    }
}
