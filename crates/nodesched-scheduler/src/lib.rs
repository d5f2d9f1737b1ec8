//! nodesched-scheduler: cluster task manager for nodesched
//!
//! This crate decides where worker lease requests run:
//! - Per-scheduling-class FIFO queues for pending and infeasible work
//! - Placement against the cluster resource view (local, spillback, wait, infeasible)
//! - Cancellation by task, owner, resource shape or predicate
//! - Resource demand reporting and debug/metrics output

pub mod class_index;
pub mod cluster_resource_scheduler;
pub mod cluster_task_manager;
pub mod local_task_manager;
pub mod placement;
pub mod queue;
pub mod reporter;
pub mod resource_view;
pub mod stats;
pub mod work;

pub use class_index::{SchedulingClass, SchedulingClassDescriptor, SchedulingClassIndex};
pub use cluster_resource_scheduler::ClusterResourceScheduler;
pub use cluster_task_manager::{
    AnnounceInfeasibleTask, ClusterTaskManager, NodeInfoGetter, SchedulingPassSummary,
};
pub use local_task_manager::{GrantingLocalTaskManager, LocalTaskManager};
pub use placement::{
    DefaultPlacementStrategy, PlacementDecision, PlacementHints, PlacementRequest,
    PlacementStrategy,
};
pub use resource_view::{ClusterResourceView, NodeResources};
pub use stats::{QueueSnapshot, SchedulerCounters};
pub use work::{LeaseReplyCallback, Work, WorkStatus};
