//! Local dispatcher contract and the granting implementation used by the daemon

use nodesched_core::{
    LeaseReply, NodeId, PendingTaskCounters, ResourceSet, SchedulingFailureType, Task, TaskId,
    WorkerId,
};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::work::{Work, WorkStatus};

/// Receives work placed on the local node and owns it from then on
pub trait LocalTaskManager: Send {
    /// Take ownership of work placed locally
    fn queue_and_schedule_task(&mut self, work: Work);

    /// Cancel owned work matching `predicate` that has not been granted yet
    ///
    /// Returns the resources charged for each cancelled work item; the caller
    /// releases them on the local node.
    fn cancel_tasks(
        &mut self,
        predicate: &dyn Fn(&Work) -> bool,
        failure_type: SchedulingFailureType,
        message: &str,
    ) -> Vec<ResourceSet>;

    /// Release the lease held by `task_id`, returning the resources it held
    fn return_worker_lease(&mut self, task_id: &TaskId) -> Option<ResourceSet>;

    /// Count owned work still waiting for resources and return an exemplar
    fn any_pending_tasks_for_resource_acquisition(
        &self,
        counters: &mut PendingTaskCounters,
    ) -> Option<&Task>;

    /// Publish dispatcher metrics
    fn record_metrics(&self) {}

    /// Human-readable state dump
    fn debug_str(&self) -> String;
}

#[derive(Debug)]
struct Lease {
    worker_id: WorkerId,
    task: Task,
}

/// Grants every handed-off task immediately and tracks the lease until it
/// is returned
///
/// Granted leases are running and cannot be cancelled through
/// [`LocalTaskManager::cancel_tasks`].
#[derive(Debug)]
pub struct GrantingLocalTaskManager {
    node_id: NodeId,
    leases: HashMap<TaskId, Lease>,
    total_granted: u64,
}

impl GrantingLocalTaskManager {
    /// Create a dispatcher for `node_id`
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            leases: HashMap::new(),
            total_granted: 0,
        }
    }

    /// Number of leases currently held
    pub fn num_leases(&self) -> usize {
        self.leases.len()
    }
}

impl LocalTaskManager for GrantingLocalTaskManager {
    fn queue_and_schedule_task(&mut self, mut work: Work) {
        let worker_id = WorkerId::new();
        let task = work.task().clone();
        work.set_status(WorkStatus::Replied);
        info!(
            task_id = %task.task_id,
            worker_id = %worker_id,
            resources = %task.required_resources,
            "Granted worker lease"
        );
        work.reply(LeaseReply::Granted {
            worker_id,
            node_id: self.node_id,
        });
        self.leases.insert(task.task_id, Lease { worker_id, task });
        self.total_granted += 1;
    }

    fn cancel_tasks(
        &mut self,
        _predicate: &dyn Fn(&Work) -> bool,
        _failure_type: SchedulingFailureType,
        _message: &str,
    ) -> Vec<ResourceSet> {
        Vec::new()
    }

    fn return_worker_lease(&mut self, task_id: &TaskId) -> Option<ResourceSet> {
        let lease = self.leases.remove(task_id)?;
        debug!(task_id = %task_id, worker_id = %lease.worker_id, "Worker lease returned");
        Some(lease.task.required_resources)
    }

    fn any_pending_tasks_for_resource_acquisition(
        &self,
        _counters: &mut PendingTaskCounters,
    ) -> Option<&Task> {
        None
    }

    fn record_metrics(&self) {
        metrics::gauge!("nodesched_local_leases").set(self.leases.len() as f64);
        metrics::counter!("nodesched_local_leases_granted_total").absolute(self.total_granted);
    }

    fn debug_str(&self) -> String {
        format!(
            "GrantingLocalTaskManager: node={} leases={} granted_total={}",
            self.node_id,
            self.leases.len(),
            self.total_granted
        )
    }
}
