//! Cluster task manager
//!
//! Admits lease requests, groups them into per-class FIFO queues and on
//! every scheduling pass asks the placement oracle where each queue head
//! should run. Work placed locally is handed to the [`LocalTaskManager`];
//! work placed elsewhere is answered with a spillback; work no node can ever
//! run is parked in the infeasible queue until the cluster changes.
//!
//! Classes are visited in ascending class-id order starting from a
//! round-robin cursor that advances one class per pass, and every pending
//! class is attempted once per pass.

use nodesched_core::{
    LeaseReply, NodeId, NodeInfo, PendingTaskCounters, ResourceSet, ResourcesData,
    SchedulerConfig, SchedulingFailureType, Task, TaskId, WorkerId,
};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Write as _;
use tracing::{debug, info, warn};

use crate::class_index::{SchedulingClass, SchedulingClassIndex};
use crate::cluster_resource_scheduler::ClusterResourceScheduler;
use crate::local_task_manager::LocalTaskManager;
use crate::placement::{PlacementDecision, PlacementHints};
use crate::queue::WorkQueue;
use crate::reporter::SchedulerResourceReporter;
use crate::stats::{QueueSnapshot, SchedulerCounters, SchedulerStats};
use crate::work::{LeaseReplyCallback, Work, WorkStatus};

/// Looks up the address of a node for spillback replies
pub trait NodeInfoGetter: Send {
    fn get_node_info(&self, node_id: &NodeId) -> Option<NodeInfo>;
}

impl<F> NodeInfoGetter for F
where
    F: Fn(&NodeId) -> Option<NodeInfo> + Send,
{
    fn get_node_info(&self, node_id: &NodeId) -> Option<NodeInfo> {
        self(node_id)
    }
}

/// Called once each time a class of work becomes infeasible
pub type AnnounceInfeasibleTask = Box<dyn FnMut(&Task) + Send>;

/// Millisecond wall clock
pub type Clock = Box<dyn Fn() -> i64 + Send>;

/// Outcome counts of one scheduling pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulingPassSummary {
    pub dispatched_locally: usize,
    pub spilled_back: usize,
    pub rejected: usize,
    pub became_infeasible: usize,
    pub revived: usize,
}

impl SchedulingPassSummary {
    /// Whether the pass moved any work
    pub fn made_progress(&self) -> bool {
        self.dispatched_locally + self.spilled_back + self.rejected + self.became_infeasible
            + self.revived
            > 0
    }

    /// Add the counts of a later pass
    pub fn merge(&mut self, other: SchedulingPassSummary) {
        self.dispatched_locally += other.dispatched_locally;
        self.spilled_back += other.spilled_back;
        self.rejected += other.rejected;
        self.became_infeasible += other.became_infeasible;
        self.revived += other.revived;
    }
}

pub struct ClusterTaskManager {
    self_node_id: NodeId,
    cluster_resource_scheduler: ClusterResourceScheduler,
    get_node_info: Box<dyn NodeInfoGetter>,
    announce_infeasible_task: AnnounceInfeasibleTask,
    local_task_manager: Box<dyn LocalTaskManager>,
    config: SchedulerConfig,
    clock: Clock,
    class_index: SchedulingClassIndex,
    tasks_to_schedule: WorkQueue,
    infeasible_tasks: WorkQueue,
    round_robin_cursor: SchedulingClass,
    stats: SchedulerStats,
}

impl ClusterTaskManager {
    pub fn new(
        cluster_resource_scheduler: ClusterResourceScheduler,
        get_node_info: impl NodeInfoGetter + 'static,
        announce_infeasible_task: AnnounceInfeasibleTask,
        local_task_manager: Box<dyn LocalTaskManager>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            self_node_id: cluster_resource_scheduler.local_node_id(),
            cluster_resource_scheduler,
            get_node_info: Box::new(get_node_info),
            announce_infeasible_task,
            local_task_manager,
            config,
            clock: Box::new(|| chrono::Utc::now().timestamp_millis()),
            class_index: SchedulingClassIndex::new(),
            tasks_to_schedule: WorkQueue::new(),
            infeasible_tasks: WorkQueue::new(),
            round_robin_cursor: SchedulingClass::default(),
            stats: SchedulerStats::new(),
        }
    }

    /// Replace the wall clock used for admission timestamps
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Id of the node this manager runs on
    pub fn self_node_id(&self) -> NodeId {
        self.self_node_id
    }

    /// Admit a lease request and run a scheduling pass
    pub fn queue_and_schedule_task(
        &mut self,
        task: Task,
        grant_or_reject: bool,
        locality_preferred: bool,
        reply: LeaseReplyCallback,
    ) {
        let class = self.class_index.class_for_task(&task);
        debug!(
            task_id = %task.task_id,
            class = %class,
            resources = %task.required_resources,
            grant_or_reject,
            "Queueing task"
        );
        let work = Work::new(
            task,
            class,
            grant_or_reject,
            locality_preferred,
            reply,
            (self.clock)(),
        );
        self.tasks_to_schedule.push_back(work);
        self.stats.mark_stale();
        self.schedule_and_dispatch_tasks();
    }

    /// Run one scheduling pass over the pending queue, then re-evaluate the
    /// infeasible queue
    pub fn schedule_and_dispatch_tasks(&mut self) -> SchedulingPassSummary {
        let mut summary = SchedulingPassSummary::default();
        self.cluster_resource_scheduler
            .expire_remote_charges((self.clock)(), self.config.remote_charge_ttl_ms);
        let classes = self
            .tasks_to_schedule
            .classes_starting_at(self.round_robin_cursor);
        if let Some(first) = classes.first() {
            self.round_robin_cursor = first.next();
        }

        for class in classes {
            self.schedule_class(class, &mut summary);
        }
        self.try_revive_infeasible(&mut summary);

        if summary.made_progress() {
            self.stats.mark_stale();
            debug!(?summary, "Scheduling pass finished");
        }
        summary
    }

    fn schedule_class(&mut self, class: SchedulingClass, summary: &mut SchedulingPassSummary) {
        let Some(descriptor) = self.class_index.descriptor(class).cloned() else {
            return;
        };
        let shape = &descriptor.resources;

        // Older infeasible work of this class must not be overtaken.
        if self.infeasible_tasks.front(class).is_some() {
            self.revive_class(class, summary);
        }

        loop {
            let Some(hints) = self.tasks_to_schedule.front(class).map(hints_for) else {
                break;
            };
            let decision = self.cluster_resource_scheduler.get_best_schedulable_node(
                shape,
                &descriptor.strategy,
                &hints,
            );

            match decision {
                PlacementDecision::Local => {
                    if let Err(e) = self
                        .cluster_resource_scheduler
                        .allocate_local_task_resources(shape)
                    {
                        warn!(class = %class, error = %e, "Local allocation failed");
                        break;
                    }
                    let Some(mut work) = self.tasks_to_schedule.pop_front(class) else {
                        break;
                    };
                    work.set_status(WorkStatus::HandedOff);
                    debug!(task_id = %work.task().task_id, "Dispatching task locally");
                    self.local_task_manager.queue_and_schedule_task(work);
                    summary.dispatched_locally += 1;
                    self.stats.counters_mut().num_dispatched_locally += 1;
                }
                PlacementDecision::Remote(node_id) if hints.grant_or_reject => {
                    let Some(mut work) = self.tasks_to_schedule.pop_front(class) else {
                        break;
                    };
                    let message = format!(
                        "Task {} cannot be granted on node {}; it only fits on node {}",
                        work.task().task_id,
                        self.self_node_id,
                        node_id
                    );
                    debug!(task_id = %work.task().task_id, "Rejecting grant-or-reject task");
                    work.set_status(WorkStatus::Replied);
                    work.reply(LeaseReply::Rejected {
                        failure_type: SchedulingFailureType::Rejected,
                        message,
                    });
                    summary.rejected += 1;
                    self.stats.counters_mut().num_rejected += 1;
                }
                PlacementDecision::Remote(node_id) => {
                    let Some(node_info) = self.get_node_info.get_node_info(&node_id) else {
                        warn!(
                            node_id = %node_id,
                            class = %class,
                            "No node info for spillback target; leaving task queued"
                        );
                        break;
                    };
                    let now = (self.clock)();
                    if let Err(e) = self
                        .cluster_resource_scheduler
                        .allocate_remote_task_resources(&node_id, shape, now)
                    {
                        warn!(node_id = %node_id, error = %e, "Remote allocation failed");
                        break;
                    }
                    let Some(mut work) = self.tasks_to_schedule.pop_front(class) else {
                        break;
                    };
                    info!(
                        task_id = %work.task().task_id,
                        node_id = %node_id,
                        endpoint = %node_info.endpoint(),
                        "Spilling back task"
                    );
                    work.set_status(WorkStatus::Replied);
                    work.reply(LeaseReply::Spillback {
                        node_id,
                        address: node_info.address,
                        port: node_info.port,
                    });
                    summary.spilled_back += 1;
                    self.stats.counters_mut().num_spilled_back += 1;
                }
                PlacementDecision::Wait => break,
                PlacementDecision::Infeasible => {
                    self.move_to_infeasible(class, summary);
                    break;
                }
            }
        }
    }

    fn move_to_infeasible(&mut self, class: SchedulingClass, summary: &mut SchedulingPassSummary) {
        let Some(mut bucket) = self.tasks_to_schedule.take_bucket(class) else {
            return;
        };
        for work in bucket.iter_mut() {
            work.set_status(WorkStatus::Infeasible);
        }
        if let Some(head) = bucket.front() {
            warn!(
                task_id = %head.task().task_id,
                class = %class,
                resources = %head.task().required_resources,
                queued = bucket.len(),
                "No node in the cluster can run this task; marking it infeasible"
            );
            (self.announce_infeasible_task)(head.task());
        }
        summary.became_infeasible += bucket.len();
        self.stats.counters_mut().num_infeasible_announced += 1;
        self.infeasible_tasks.append_bucket(class, bucket);
    }

    fn try_revive_infeasible(&mut self, summary: &mut SchedulingPassSummary) {
        for class in self.infeasible_tasks.classes() {
            self.revive_class(class, summary);
        }
    }

    /// Move the infeasible bucket of `class` back to pending if it can be placed
    ///
    /// Revived work goes ahead of pending work of the same class: it was
    /// admitted earlier, since a class only enters the infeasible queue with
    /// its whole pending bucket.
    fn revive_class(&mut self, class: SchedulingClass, summary: &mut SchedulingPassSummary) {
        let Some(descriptor) = self.class_index.descriptor(class).cloned() else {
            return;
        };
        let Some(hints) = self.infeasible_tasks.front(class).map(hints_for) else {
            return;
        };
        let decision = self.cluster_resource_scheduler.get_best_schedulable_node(
            &descriptor.resources,
            &descriptor.strategy,
            &hints,
        );
        if decision == PlacementDecision::Infeasible {
            return;
        }
        let Some(mut bucket) = self.infeasible_tasks.take_bucket(class) else {
            return;
        };
        for work in bucket.iter_mut() {
            work.set_status(WorkStatus::Queued);
        }
        info!(
            class = %class,
            resources = %descriptor.resources,
            revived = bucket.len(),
            "Infeasible tasks became feasible"
        );
        summary.revived += bucket.len();
        self.stats.counters_mut().num_revived += bucket.len() as u64;
        self.tasks_to_schedule.prepend_bucket(class, bucket);
    }

    /// Cancel a single task; false if it is unknown or already running
    pub fn cancel_task(
        &mut self,
        task_id: &TaskId,
        failure_type: SchedulingFailureType,
        message: &str,
    ) -> bool {
        let task_id = *task_id;
        self.cancel_tasks(
            &move |work: &Work| work.task().task_id == task_id,
            failure_type,
            message,
        )
    }

    /// Cancel every task submitted by a worker
    pub fn cancel_all_tasks_owned_by_worker(
        &mut self,
        worker_id: &WorkerId,
        failure_type: SchedulingFailureType,
        message: &str,
    ) -> bool {
        let worker_id = *worker_id;
        self.cancel_tasks(
            &move |work: &Work| work.task().owner_worker_id == worker_id,
            failure_type,
            message,
        )
    }

    /// Cancel every task whose owner runs on a node
    pub fn cancel_all_tasks_owned_by_node(
        &mut self,
        node_id: &NodeId,
        failure_type: SchedulingFailureType,
        message: &str,
    ) -> bool {
        let node_id = *node_id;
        self.cancel_tasks(
            &move |work: &Work| work.task().owner_node_id == node_id,
            failure_type,
            message,
        )
    }

    /// Cancel queued work whose class shape is one of `shapes`
    ///
    /// Work already handed to the local dispatcher is left alone.
    pub fn cancel_tasks_with_resource_shapes(&mut self, shapes: &[ResourceSet]) -> bool {
        let matching: HashSet<SchedulingClass> = self
            .tasks_to_schedule
            .classes()
            .into_iter()
            .chain(self.infeasible_tasks.classes())
            .filter(|class| {
                self.class_index
                    .descriptor(*class)
                    .is_some_and(|d| shapes.contains(&d.resources))
            })
            .collect();
        if matching.is_empty() {
            return false;
        }

        let shapes_str = shapes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let message = format!(
            "Tasks or actors with resource shapes [{}] failed to schedule because there are not \
             enough resources for them on the whole cluster",
            shapes_str
        );
        warn!(shapes = %shapes_str, "Cancelling tasks with unschedulable resource shapes");

        let removed = self.cancel_queued(
            &|work: &Work| matching.contains(&work.scheduling_class()),
            SchedulingFailureType::CancelledUnschedulable,
            &message,
        );
        removed > 0
    }

    /// Cancel queued and locally dispatched work matching `predicate`
    ///
    /// Returns true if at least one work item was cancelled anywhere.
    pub fn cancel_tasks(
        &mut self,
        predicate: &dyn Fn(&Work) -> bool,
        failure_type: SchedulingFailureType,
        message: &str,
    ) -> bool {
        let removed = self.cancel_queued(predicate, failure_type, message);
        let released = self
            .local_task_manager
            .cancel_tasks(predicate, failure_type, message);
        if released.is_empty() {
            return removed > 0;
        }

        for resources in &released {
            if let Err(e) = self
                .cluster_resource_scheduler
                .release_local_task_resources(resources)
            {
                warn!(resources = %resources, error = %e, "Failed to release cancelled task resources");
            }
        }
        debug!(cancelled = released.len(), "Cancelled work held by the local dispatcher");
        self.stats.counters_mut().num_cancelled += released.len() as u64;
        self.schedule_and_dispatch_tasks();
        true
    }

    fn cancel_queued(
        &mut self,
        predicate: &dyn Fn(&Work) -> bool,
        failure_type: SchedulingFailureType,
        message: &str,
    ) -> usize {
        let mut removed = self.tasks_to_schedule.remove_if(predicate);
        removed.extend(self.infeasible_tasks.remove_if(predicate));
        let count = removed.len();
        for work in removed {
            debug!(
                task_id = %work.task().task_id,
                failure_type = %failure_type,
                "Cancelling queued task"
            );
            work.cancel(failure_type, message);
        }
        if count > 0 {
            self.stats.counters_mut().num_cancelled += count as u64;
        }
        count
    }

    /// Return a granted lease, freeing its resources and running a pass
    pub fn return_worker_lease(&mut self, task_id: &TaskId) -> bool {
        let Some(resources) = self.local_task_manager.return_worker_lease(task_id) else {
            debug!(task_id = %task_id, "Returned lease is unknown");
            return false;
        };
        if let Err(e) = self
            .cluster_resource_scheduler
            .release_local_task_resources(&resources)
        {
            warn!(task_id = %task_id, error = %e, "Failed to release lease resources");
        }
        self.schedule_and_dispatch_tasks();
        true
    }

    fn reporter(&self) -> SchedulerResourceReporter<'_> {
        SchedulerResourceReporter::new(
            &self.class_index,
            &self.tasks_to_schedule,
            &self.infeasible_tasks,
            self.config.max_resource_shapes_per_load_report,
        )
    }

    /// Report queued demand per resource shape
    pub fn fill_resource_usage(&self, data: &mut ResourcesData) {
        self.reporter().fill_resource_usage(data);
    }

    /// Report queued actor-creation demand per resource shape
    pub fn fill_pending_actor_info(&self, data: &mut ResourcesData) {
        self.reporter().fill_pending_actor_info(data);
    }

    /// Count pending work by kind and return an exemplar task
    ///
    /// This manager's own queue is preferred for the exemplar; the local
    /// dispatcher is always consulted so the counters cover both.
    pub fn any_pending_tasks_for_resource_acquisition(
        &self,
        counters: &mut PendingTaskCounters,
    ) -> Option<&Task> {
        let mut exemplar = None;
        for work in self.tasks_to_schedule.iter_works() {
            if work.task().is_actor_creation() {
                counters.num_pending_actor_creation += 1;
            } else {
                counters.num_pending_tasks += 1;
            }
            exemplar.get_or_insert(work.task());
        }
        let local = self
            .local_task_manager
            .any_pending_tasks_for_resource_acquisition(counters);
        exemplar.or(local)
    }

    fn snapshot(&self) -> QueueSnapshot {
        self.stats.snapshot_with(|| QueueSnapshot {
            num_pending: self.tasks_to_schedule.len(),
            num_infeasible: self.infeasible_tasks.len(),
            num_pending_classes: self.tasks_to_schedule.num_classes(),
            num_infeasible_classes: self.infeasible_tasks.num_classes(),
            num_pending_actor_creation: self
                .tasks_to_schedule
                .iter_works()
                .filter(|w| w.task().is_actor_creation())
                .count(),
            oldest_pending_created_at_ms: self
                .tasks_to_schedule
                .iter_works()
                .map(Work::created_at_ms)
                .min(),
        })
    }

    /// Publish queue gauges and counters
    pub fn record_metrics(&self) {
        self.stats.record_metrics(&self.snapshot());
        self.local_task_manager.record_metrics();
    }

    /// Scheduler counters
    pub fn counters(&self) -> SchedulerCounters {
        self.stats.counters()
    }

    /// Human-readable dump of queues and counters
    pub fn debug_str(&self) -> String {
        let mut out = self.stats.debug_str(&self.snapshot(), (self.clock)());
        for (label, queue) in [
            ("pending", &self.tasks_to_schedule),
            ("infeasible", &self.infeasible_tasks),
        ] {
            for (class, bucket) in queue.iter() {
                let descriptor = self
                    .class_index
                    .descriptor(class)
                    .map(ToString::to_string)
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "  [{}] class {} {}: {} tasks",
                    label,
                    class,
                    descriptor,
                    bucket.len()
                );
            }
        }
        out.push_str(&self.local_task_manager.debug_str());
        out
    }

    /// Number of work items waiting in the infeasible queue
    pub fn infeasible_queue_size(&self) -> usize {
        self.infeasible_tasks.len()
    }

    /// Number of work items waiting in the pending queue
    pub fn pending_queue_size(&self) -> usize {
        self.tasks_to_schedule.len()
    }

    /// Placement oracle
    pub fn cluster_resource_scheduler(&self) -> &ClusterResourceScheduler {
        &self.cluster_resource_scheduler
    }

    /// Placement oracle, for node updates
    pub fn cluster_resource_scheduler_mut(&mut self) -> &mut ClusterResourceScheduler {
        &mut self.cluster_resource_scheduler
    }

    #[cfg(test)]
    pub(crate) fn pending_classes(&self) -> Vec<SchedulingClass> {
        self.tasks_to_schedule.classes()
    }

    #[cfg(test)]
    pub(crate) fn pending_task_ids(&self, class: SchedulingClass) -> Vec<TaskId> {
        self.tasks_to_schedule
            .iter()
            .filter(|(c, _)| *c == class)
            .flat_map(|(_, bucket)| bucket.iter().map(|w| w.task().task_id))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn infeasible_contains(&self, task_id: &TaskId) -> bool {
        self.infeasible_tasks.contains_task(task_id)
    }

    #[cfg(test)]
    pub(crate) fn round_robin_cursor(&self) -> SchedulingClass {
        self.round_robin_cursor
    }
}

fn hints_for(work: &Work) -> PlacementHints {
    PlacementHints {
        grant_or_reject: work.grant_or_reject,
        locality_preferred: work.locality_preferred,
        preferred_node: work.task().locality_hint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodesched_core::{FixedPoint, SchedulingStrategy, TaskKind, CPU, GPU};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::{Arc, Mutex};

    fn cpus(n: f64) -> ResourceSet {
        ResourceSet::from_pairs([(CPU, n)])
    }

    fn cpu_task(n: f64) -> Task {
        Task::new("f", cpus(n))
    }

    #[derive(Default)]
    struct FakeLocalState {
        waiting: Vec<Work>,
        running: HashMap<TaskId, ResourceSet>,
        cancel_calls: usize,
    }

    /// Local dispatcher that holds handed-off work until told to grant it
    struct FakeLocalTaskManager {
        node_id: NodeId,
        state: Arc<Mutex<FakeLocalState>>,
    }

    impl LocalTaskManager for FakeLocalTaskManager {
        fn queue_and_schedule_task(&mut self, work: Work) {
            self.state.lock().unwrap().waiting.push(work);
        }

        fn cancel_tasks(
            &mut self,
            predicate: &dyn Fn(&Work) -> bool,
            failure_type: SchedulingFailureType,
            message: &str,
        ) -> Vec<ResourceSet> {
            let mut state = self.state.lock().unwrap();
            state.cancel_calls += 1;
            let (matched, kept): (Vec<Work>, Vec<Work>) =
                state.waiting.drain(..).partition(|w| predicate(w));
            state.waiting = kept;
            matched
                .into_iter()
                .map(|work| {
                    let resources = work.task().required_resources.clone();
                    work.cancel(failure_type, message);
                    resources
                })
                .collect()
        }

        fn return_worker_lease(&mut self, task_id: &TaskId) -> Option<ResourceSet> {
            self.state.lock().unwrap().running.remove(task_id)
        }

        fn any_pending_tasks_for_resource_acquisition(
            &self,
            counters: &mut PendingTaskCounters,
        ) -> Option<&Task> {
            counters.num_pending_tasks += self.state.lock().unwrap().waiting.len() as u64;
            None
        }

        fn debug_str(&self) -> String {
            format!("FakeLocalTaskManager node={}", self.node_id)
        }
    }

    type Replies = Arc<Mutex<HashMap<TaskId, LeaseReply>>>;

    struct Harness {
        ctm: ClusterTaskManager,
        local: NodeId,
        replies: Replies,
        announced: Arc<Mutex<Vec<TaskId>>>,
        fake: Arc<Mutex<FakeLocalState>>,
        node_infos: Arc<Mutex<HashMap<NodeId, NodeInfo>>>,
        now_ms: Arc<AtomicI64>,
    }

    impl Harness {
        fn new(local_resources: ResourceSet) -> Self {
            Self::with_config(local_resources, SchedulerConfig::default())
        }

        fn with_config(local_resources: ResourceSet, config: SchedulerConfig) -> Self {
            let local = NodeId::new();
            let announced = Arc::new(Mutex::new(Vec::new()));
            let fake = Arc::new(Mutex::new(FakeLocalState::default()));
            let node_infos: Arc<Mutex<HashMap<NodeId, NodeInfo>>> =
                Arc::new(Mutex::new(HashMap::new()));

            let now_ms = Arc::new(AtomicI64::new(1_000));

            let sink = announced.clone();
            let infos = node_infos.clone();
            let clock = now_ms.clone();
            let ctm = ClusterTaskManager::new(
                ClusterResourceScheduler::with_default_strategy(
                    local,
                    local_resources,
                    config.spread_threshold,
                ),
                move |node_id: &NodeId| infos.lock().unwrap().get(node_id).cloned(),
                Box::new(move |task: &Task| sink.lock().unwrap().push(task.task_id)),
                Box::new(FakeLocalTaskManager {
                    node_id: local,
                    state: fake.clone(),
                }),
                config,
            )
            .with_clock(move || clock.load(Ordering::SeqCst));

            Self {
                ctm,
                local,
                replies: Arc::new(Mutex::new(HashMap::new())),
                announced,
                fake,
                node_infos,
                now_ms,
            }
        }

        fn advance_clock(&self, ms: i64) {
            self.now_ms.fetch_add(ms, Ordering::SeqCst);
        }

        fn submit(&mut self, task: Task) -> TaskId {
            self.submit_with(task, false, false)
        }

        fn submit_with(&mut self, task: Task, grant_or_reject: bool, locality: bool) -> TaskId {
            let task_id = task.task_id;
            let replies = self.replies.clone();
            let callback = LeaseReplyCallback::new(move |reply| {
                replies.lock().unwrap().insert(task_id, reply);
            });
            self.ctm
                .queue_and_schedule_task(task, grant_or_reject, locality, callback);
            task_id
        }

        fn reply(&self, task_id: &TaskId) -> Option<LeaseReply> {
            self.replies.lock().unwrap().get(task_id).cloned()
        }

        fn add_remote(&mut self, resources: ResourceSet) -> NodeId {
            let node_id = NodeId::new();
            self.ctm
                .cluster_resource_scheduler_mut()
                .update_node_resources(node_id, resources, None);
            self.node_infos
                .lock()
                .unwrap()
                .insert(node_id, NodeInfo::new(node_id, "10.0.0.9", 7070));
            node_id
        }

        fn handed_off(&self) -> Vec<TaskId> {
            self.fake
                .lock()
                .unwrap()
                .waiting
                .iter()
                .map(|w| w.task().task_id)
                .collect()
        }

        /// Grant every handed-off work item and keep it as a running lease
        fn grant_all(&self) {
            let mut state = self.fake.lock().unwrap();
            let waiting: Vec<Work> = state.waiting.drain(..).collect();
            for work in waiting {
                let task_id = work.task().task_id;
                state
                    .running
                    .insert(task_id, work.task().required_resources.clone());
                work.reply(LeaseReply::Granted {
                    worker_id: WorkerId::new(),
                    node_id: self.local,
                });
            }
        }

        fn announcements(&self) -> Vec<TaskId> {
            self.announced.lock().unwrap().clone()
        }
    }

    #[test]
    fn test_granted_locally_on_first_pass() {
        let mut h = Harness::new(cpus(2.0));
        let task_id = h.submit(cpu_task(1.0));

        assert_eq!(h.handed_off(), vec![task_id]);
        assert_eq!(h.ctm.pending_queue_size(), 0);

        h.grant_all();
        assert!(h.reply(&task_id).unwrap().is_granted());
        assert_eq!(h.ctm.counters().num_dispatched_locally, 1);
    }

    #[test]
    fn test_infeasible_task_announced_once() {
        let mut h = Harness::new(cpus(4.0));
        let task_id = h.submit(cpu_task(100.0));

        assert_eq!(h.ctm.infeasible_queue_size(), 1);
        assert_eq!(h.ctm.pending_queue_size(), 0);
        assert!(h.ctm.infeasible_contains(&task_id));
        assert_eq!(h.announcements(), vec![task_id]);
        assert!(h.reply(&task_id).is_none());

        for _ in 0..3 {
            h.ctm.schedule_and_dispatch_tasks();
        }
        assert_eq!(h.announcements().len(), 1);

        let second = h.submit(cpu_task(100.0));
        assert_eq!(h.ctm.infeasible_queue_size(), 2);
        assert_eq!(h.announcements(), vec![task_id, second]);
    }

    #[test]
    fn test_same_class_fifo_when_capacity_is_short() {
        let mut h = Harness::new(cpus(1.0));
        let a = h.submit(cpu_task(1.0));
        let b = h.submit(cpu_task(1.0));

        assert_eq!(h.handed_off(), vec![a]);
        let class = h.ctm.pending_classes()[0];
        assert_eq!(h.ctm.pending_task_ids(class), vec![b]);

        h.grant_all();
        assert!(h.ctm.return_worker_lease(&a));
        assert_eq!(h.handed_off(), vec![b]);
        assert_eq!(h.ctm.pending_queue_size(), 0);
    }

    #[test]
    fn test_cancel_queued_task() {
        let mut h = Harness::new(cpus(1.0));
        let running = h.submit(cpu_task(1.0));
        let queued = h.submit(cpu_task(1.0));
        assert_eq!(h.ctm.pending_queue_size(), 1);

        let cancelled = h.ctm.cancel_task(
            &queued,
            SchedulingFailureType::CancelledIntended,
            "user cancelled",
        );
        assert!(cancelled);
        assert_eq!(h.ctm.pending_queue_size(), 0);
        assert_eq!(
            h.reply(&queued),
            Some(LeaseReply::Rejected {
                failure_type: SchedulingFailureType::CancelledIntended,
                message: "user cancelled".to_string(),
            })
        );
        assert!(h.reply(&running).is_none());
        assert_eq!(h.ctm.counters().num_cancelled, 1);
    }

    #[test]
    fn test_new_node_revives_infeasible_task() {
        let mut h = Harness::new(cpus(4.0));
        let task_id = h.submit(cpu_task(100.0));
        assert_eq!(h.ctm.infeasible_queue_size(), 1);

        let remote = h.add_remote(cpus(128.0));
        let summary = h.ctm.schedule_and_dispatch_tasks();
        assert_eq!(summary.revived, 1);
        assert_eq!(h.ctm.infeasible_queue_size(), 0);
        assert_eq!(h.ctm.pending_queue_size(), 1);

        let summary = h.ctm.schedule_and_dispatch_tasks();
        assert_eq!(summary.spilled_back, 1);
        assert_eq!(
            h.reply(&task_id),
            Some(LeaseReply::Spillback {
                node_id: remote,
                address: "10.0.0.9".to_string(),
                port: 7070,
            })
        );
        assert_eq!(h.announcements().len(), 1);
    }

    #[test]
    fn test_local_resize_revives_and_dispatches_locally() {
        let mut h = Harness::new(cpus(4.0));
        let task_id = h.submit(cpu_task(8.0));
        let local = h.local;

        h.ctm
            .cluster_resource_scheduler_mut()
            .update_node_resources(local, cpus(8.0), None);
        h.ctm.schedule_and_dispatch_tasks();
        h.ctm.schedule_and_dispatch_tasks();

        assert_eq!(h.handed_off(), vec![task_id]);
    }

    #[test]
    fn test_revived_work_keeps_its_place_ahead_of_newer_work() {
        let mut h = Harness::new(cpus(4.0));
        let older = h.submit(cpu_task(8.0));
        assert!(h.ctm.infeasible_contains(&older));
        let local = h.local;

        h.ctm
            .cluster_resource_scheduler_mut()
            .update_node_resources(local, cpus(8.0), None);
        let newer = h.submit(cpu_task(8.0));

        assert_eq!(h.handed_off(), vec![older]);
        assert!(!h.ctm.infeasible_contains(&older));
        assert_eq!(h.ctm.pending_queue_size(), 1);
        let class = h.ctm.pending_classes()[0];
        assert_eq!(h.ctm.pending_task_ids(class), vec![newer]);
    }

    #[test]
    fn test_waiting_class_does_not_block_other_classes() {
        let mut h = Harness::new(ResourceSet::from_pairs([(CPU, 1.0), (GPU, 1.0)]));
        let first = h.submit(cpu_task(1.0));
        let blocked = h.submit(cpu_task(1.0));
        let gpu = h.submit(Task::new("g", ResourceSet::from_pairs([(GPU, 1.0)])));

        assert_eq!(h.handed_off(), vec![first, gpu]);
        assert_eq!(h.ctm.pending_queue_size(), 1);
        assert!(h.reply(&blocked).is_none());
    }

    #[test]
    fn test_fifo_across_passes() {
        let mut h = Harness::new(cpus(2.0));
        let a = h.submit(cpu_task(2.0));
        let b = h.submit(cpu_task(2.0));
        let c = h.submit(cpu_task(2.0));
        assert_eq!(h.handed_off(), vec![a]);

        h.grant_all();
        h.ctm.return_worker_lease(&a);
        assert_eq!(h.handed_off(), vec![b]);

        h.grant_all();
        h.ctm.return_worker_lease(&b);
        assert_eq!(h.handed_off(), vec![c]);
    }

    #[test]
    fn test_grant_or_reject_rejected_instead_of_spillback() {
        let mut h = Harness::new(cpus(1.0));
        let busy = h.submit(cpu_task(1.0));
        h.add_remote(cpus(8.0));
        let task_id = h.submit_with(cpu_task(1.0), true, false);

        assert_eq!(h.handed_off(), vec![busy]);
        assert_eq!(
            h.reply(&task_id).and_then(|r| r.failure_type()),
            Some(SchedulingFailureType::Rejected)
        );
        assert_eq!(h.ctm.counters().num_rejected, 1);
    }

    #[test]
    fn test_spillback_to_remote_node() {
        let mut h = Harness::new(cpus(1.0));
        h.submit(cpu_task(1.0));
        let remote = h.add_remote(cpus(4.0));
        let spilled = h.submit(cpu_task(1.0));

        match h.reply(&spilled) {
            Some(LeaseReply::Spillback { node_id, port, .. }) => {
                assert_eq!(node_id, remote);
                assert_eq!(port, 7070);
            }
            other => panic!("unexpected reply {:?}", other),
        }
        let view = h.ctm.cluster_resource_scheduler().view();
        assert_eq!(view.node(&remote).unwrap().available, cpus(3.0));
    }

    #[test]
    fn test_remote_heartbeat_clears_spillback_charge() {
        let mut h = Harness::new(cpus(1.0));
        h.submit(cpu_task(1.0));
        let remote = h.add_remote(cpus(1.0));
        let first = h.submit(cpu_task(1.0));
        assert!(matches!(h.reply(&first), Some(LeaseReply::Spillback { .. })));
        assert!(h
            .ctm
            .cluster_resource_scheduler()
            .view()
            .node(&remote)
            .unwrap()
            .available
            .is_empty());

        h.ctm
            .cluster_resource_scheduler_mut()
            .update_node_resources(remote, cpus(1.0), None);
        let view = h.ctm.cluster_resource_scheduler().view();
        assert_eq!(view.node(&remote).unwrap().available, cpus(1.0));

        let second = h.submit(cpu_task(1.0));
        assert!(matches!(h.reply(&second), Some(LeaseReply::Spillback { .. })));
    }

    #[test]
    fn test_unreported_spillback_charge_expires() {
        let config = SchedulerConfig {
            remote_charge_ttl_ms: 500,
            ..SchedulerConfig::default()
        };
        let mut h = Harness::with_config(cpus(1.0), config);
        h.submit(cpu_task(1.0));
        h.add_remote(cpus(1.0));
        let first = h.submit(cpu_task(1.0));
        assert!(matches!(h.reply(&first), Some(LeaseReply::Spillback { .. })));

        let second = h.submit(cpu_task(1.0));
        assert!(h.reply(&second).is_none());

        h.advance_clock(499);
        h.ctm.schedule_and_dispatch_tasks();
        assert!(h.reply(&second).is_none());

        h.advance_clock(1);
        h.ctm.schedule_and_dispatch_tasks();
        assert!(matches!(h.reply(&second), Some(LeaseReply::Spillback { .. })));
        assert_eq!(h.ctm.cluster_resource_scheduler().num_remote_charges(), 1);
    }

    #[test]
    fn test_node_label_strategy_spills_to_labelled_node() {
        let mut h = Harness::new(cpus(4.0));
        let remote = h.add_remote(cpus(4.0));
        let labels: std::collections::BTreeMap<String, String> =
            [("zone".to_string(), "b".to_string())].into();
        h.ctm
            .cluster_resource_scheduler_mut()
            .view_mut()
            .set_node_labels(&remote, labels)
            .unwrap();

        let task = cpu_task(1.0).with_strategy(SchedulingStrategy::NodeLabel {
            key: "zone".to_string(),
            value: "b".to_string(),
            soft: false,
        });
        let task_id = h.submit(task);
        assert!(matches!(
            h.reply(&task_id),
            Some(LeaseReply::Spillback { node_id, .. }) if node_id == remote
        ));

        let task = cpu_task(1.0).with_strategy(SchedulingStrategy::NodeLabel {
            key: "zone".to_string(),
            value: "c".to_string(),
            soft: false,
        });
        let task_id = h.submit(task);
        assert!(h.ctm.infeasible_contains(&task_id));
    }

    #[test]
    fn test_missing_node_info_leaves_work_queued() {
        let mut h = Harness::new(cpus(1.0));
        h.submit(cpu_task(1.0));
        let remote = NodeId::new();
        h.ctm
            .cluster_resource_scheduler_mut()
            .update_node_resources(remote, cpus(4.0), None);
        let task_id = h.submit(cpu_task(1.0));

        assert!(h.reply(&task_id).is_none());
        assert_eq!(h.ctm.pending_queue_size(), 1);
    }

    #[test]
    fn test_cancel_delegates_to_local_dispatcher() {
        let mut h = Harness::new(cpus(2.0));
        let task_id = h.submit(cpu_task(1.0));
        assert_eq!(h.handed_off(), vec![task_id]);

        assert!(h
            .ctm
            .cancel_task(&task_id, SchedulingFailureType::CancelledIntended, "stop"));
        assert!(h.handed_off().is_empty());
        assert_eq!(
            h.reply(&task_id).and_then(|r| r.failure_type()),
            Some(SchedulingFailureType::CancelledIntended)
        );
    }

    #[test]
    fn test_cancelled_handoff_releases_local_resources() {
        let mut h = Harness::new(cpus(1.0));
        let first = h.submit(cpu_task(1.0));
        assert_eq!(h.handed_off(), vec![first]);

        assert!(h
            .ctm
            .cancel_task(&first, SchedulingFailureType::CancelledIntended, "stop"));
        let view = h.ctm.cluster_resource_scheduler().view();
        assert_eq!(view.node(&h.local).unwrap().available, cpus(1.0));

        let second = h.submit(cpu_task(1.0));
        assert_eq!(h.handed_off(), vec![second]);
        assert_eq!(h.ctm.counters().num_cancelled, 1);
    }

    #[test]
    fn test_cancel_redispatches_waiting_work() {
        let mut h = Harness::new(cpus(1.0));
        let first = h.submit(cpu_task(1.0));
        let second = h.submit(cpu_task(1.0));
        assert_eq!(h.ctm.pending_queue_size(), 1);

        assert!(h
            .ctm
            .cancel_task(&first, SchedulingFailureType::CancelledIntended, "stop"));
        assert_eq!(h.handed_off(), vec![second]);
        assert_eq!(h.ctm.pending_queue_size(), 0);
    }

    #[test]
    fn test_cancel_declined_for_running_task() {
        let mut h = Harness::new(cpus(2.0));
        let task_id = h.submit(cpu_task(1.0));
        h.grant_all();

        assert!(!h
            .ctm
            .cancel_task(&task_id, SchedulingFailureType::CancelledIntended, "stop"));
        assert!(!h.ctm.cancel_task(
            &TaskId::new(),
            SchedulingFailureType::CancelledIntended,
            "stop"
        ));
    }

    #[test]
    fn test_cancel_by_owner() {
        let mut h = Harness::new(cpus(4.0));
        let worker = WorkerId::new();
        let owner_node = NodeId::new();
        let mine = h.submit(cpu_task(100.0).with_owner(worker, owner_node));
        let theirs = h.submit(cpu_task(100.0));
        assert_eq!(h.ctm.infeasible_queue_size(), 2);

        assert!(h.ctm.cancel_all_tasks_owned_by_worker(
            &worker,
            SchedulingFailureType::CancelledIntended,
            "worker died"
        ));
        assert!(h.reply(&mine).is_some());
        assert!(h.reply(&theirs).is_none());
        assert_eq!(h.ctm.infeasible_queue_size(), 1);

        assert!(!h.ctm.cancel_all_tasks_owned_by_node(
            &owner_node,
            SchedulingFailureType::CancelledIntended,
            "node died"
        ));
    }

    #[test]
    fn test_cancel_by_resource_shapes_skips_local_dispatcher() {
        let mut h = Harness::new(cpus(1.0));
        let running = h.submit(cpu_task(1.0));
        let queued = h.submit(cpu_task(1.0));
        let infeasible = h.submit(cpu_task(64.0));
        let other = h.submit(Task::new("g", cpus(0.5)));
        let calls_before = h.fake.lock().unwrap().cancel_calls;

        assert!(h.ctm.cancel_tasks_with_resource_shapes(&[cpus(1.0), cpus(64.0)]));

        assert_eq!(h.fake.lock().unwrap().cancel_calls, calls_before);
        assert_eq!(h.handed_off(), vec![running]);
        for task_id in [queued, infeasible] {
            assert_eq!(
                h.reply(&task_id).and_then(|r| r.failure_type()),
                Some(SchedulingFailureType::CancelledUnschedulable)
            );
        }
        assert!(h.reply(&other).is_none());
        assert!(!h.ctm.cancel_tasks_with_resource_shapes(&[cpus(3.0)]));
    }

    #[test]
    fn test_cancel_tasks_removes_every_match() {
        let mut h = Harness::new(cpus(4.0));
        let ids: Vec<TaskId> = (0..3).map(|_| h.submit(cpu_task(50.0))).collect();
        assert_eq!(h.ctm.infeasible_queue_size(), 3);

        assert!(h.ctm.cancel_tasks(
            &|_| true,
            SchedulingFailureType::CancelledPlacementGroupRemoved,
            "gone"
        ));
        assert_eq!(h.ctm.infeasible_queue_size(), 0);
        assert!(ids.iter().all(|id| h.reply(id).is_some()));
        assert!(!h
            .ctm
            .cancel_tasks(&|_| true, SchedulingFailureType::Failed, "again"));
    }

    #[test]
    fn test_resource_usage_reports_every_class() {
        let mut h = Harness::new(cpus(1.0));
        h.submit(cpu_task(1.0));
        for _ in 0..3 {
            h.submit(cpu_task(1.0));
        }
        h.submit(cpu_task(32.0));
        h.submit(Task::new("g", ResourceSet::from_pairs([(GPU, 1.0)])));

        let mut data = ResourcesData::new(h.local);
        h.ctm.fill_resource_usage(&mut data);

        assert_eq!(data.resource_load_by_shape.len(), 3);
        let total: u64 = data.resource_load_by_shape.iter().map(|d| d.total_queued()).sum();
        assert_eq!(total as usize, h.ctm.pending_queue_size() + h.ctm.infeasible_queue_size());
        assert_eq!(
            data.resource_load,
            ResourceSet::from_pairs([(CPU, 35.0), (GPU, 1.0)])
        );
    }

    #[test]
    fn test_resource_usage_respects_shape_cap() {
        let config = SchedulerConfig {
            max_resource_shapes_per_load_report: 1,
            ..Default::default()
        };
        let mut h = Harness::with_config(cpus(1.0), config);
        h.submit(cpu_task(10.0));
        h.submit(cpu_task(20.0));

        let mut data = ResourcesData::default();
        h.ctm.fill_resource_usage(&mut data);
        assert_eq!(data.resource_load_by_shape.len(), 1);
    }

    #[test]
    fn test_resource_usage_saturates_huge_demand() {
        let mut h = Harness::new(cpus(1.0));
        let huge = ResourceSet::from_pairs([("memory", 1e15)]);
        h.submit(Task::new("big", huge.clone()));
        h.submit(Task::new("big", huge));
        assert_eq!(h.ctm.infeasible_queue_size(), 2);

        let mut data = ResourcesData::new(h.local);
        h.ctm.fill_resource_usage(&mut data);
        assert_eq!(data.resource_load.get("memory"), FixedPoint::MAX);
        assert_eq!(data.resource_load_by_shape[0].total_queued(), 2);
    }

    #[test]
    fn test_pending_actor_info_and_counters() {
        let mut h = Harness::new(cpus(1.0));
        h.submit(cpu_task(1.0));
        let actor = h.submit(cpu_task(1.0).with_kind(TaskKind::ActorCreation));
        h.submit(cpu_task(1.0));

        let mut data = ResourcesData::default();
        h.ctm.fill_pending_actor_info(&mut data);
        assert_eq!(data.resource_load_by_shape.len(), 1);
        assert_eq!(data.resource_load_by_shape[0].num_ready_requests_queued, 1);

        let mut counters = PendingTaskCounters::default();
        let exemplar = h
            .ctm
            .any_pending_tasks_for_resource_acquisition(&mut counters)
            .map(|t| t.task_id);
        assert_eq!(exemplar, Some(actor));
        assert_eq!(counters.num_pending_actor_creation, 1);
        // One queued normal task plus the one held by the local dispatcher.
        assert_eq!(counters.num_pending_tasks, 2);
    }

    #[test]
    fn test_returned_lease_frees_resources_for_waiting_work() {
        let mut h = Harness::new(cpus(1.0));
        let first = h.submit(cpu_task(1.0));
        let second = h.submit(cpu_task(1.0));
        h.grant_all();
        assert_eq!(h.ctm.pending_queue_size(), 1);

        assert!(h.ctm.return_worker_lease(&first));
        assert_eq!(h.handed_off(), vec![second]);
        assert_eq!(h.ctm.pending_queue_size(), 0);

        assert!(!h.ctm.return_worker_lease(&first));
    }

    #[test]
    fn test_round_robin_cursor_advances() {
        let mut h = Harness::new(cpus(4.0));
        h.submit(cpu_task(4.0));
        h.submit(cpu_task(4.0));
        h.submit(Task::new("g", cpus(4.0)));
        h.submit(Task::new("g", cpus(4.0)));
        let classes = h.ctm.pending_classes();
        assert_eq!(classes.len(), 2);

        h.ctm.schedule_and_dispatch_tasks();
        let first = h.ctm.round_robin_cursor();
        h.ctm.schedule_and_dispatch_tasks();
        let second = h.ctm.round_robin_cursor();
        assert_ne!(first, second);
        assert!(classes.contains(&first) || classes.contains(&second));
    }

    #[test]
    fn test_classes_take_turns_for_a_single_slot() {
        let mut h = Harness::new(cpus(1.0));
        let blocker = h.submit(Task::new("h", cpus(1.0)));
        h.grant_all();

        let f = h.submit(cpu_task(1.0));
        h.submit(cpu_task(1.0));
        let g = h.submit(Task::new("g", cpus(1.0)));
        h.submit(Task::new("g", cpus(1.0)));
        assert_eq!(h.ctm.pending_classes().len(), 2);

        assert!(h.ctm.return_worker_lease(&blocker));
        let first = h.handed_off();
        assert_eq!(first.len(), 1);
        h.grant_all();

        assert!(h.ctm.return_worker_lease(&first[0]));
        let second = h.handed_off();
        assert_eq!(second.len(), 1);

        let mut winners = vec![first[0], second[0]];
        winners.sort();
        let mut expected = vec![f, g];
        expected.sort();
        assert_eq!(winners, expected);
    }

    #[test]
    fn test_debug_str_lists_queues() {
        let mut h = Harness::new(cpus(1.0));
        h.submit(cpu_task(1.0));
        h.submit(cpu_task(1.0));
        h.submit(cpu_task(16.0));

        let dump = h.ctm.debug_str();
        assert!(dump.starts_with("========== ClusterTaskManager =========="));
        assert!(dump.contains("Pending tasks: 1 in 1 classes"));
        assert!(dump.contains("Infeasible tasks: 1 in 1 classes"));
        assert!(dump.contains("[infeasible]"));
        assert!(dump.contains("FakeLocalTaskManager"));
        assert!(dump.contains("Oldest pending task age: 0ms"));

        h.ctm.record_metrics();
    }
}
