//! Resource demand reporting over the pending and infeasible queues

use nodesched_core::{ResourceDemand, ResourceSet, ResourcesData};
use std::collections::BTreeMap;

use crate::class_index::{SchedulingClass, SchedulingClassIndex};
use crate::queue::WorkQueue;
use crate::work::Work;

/// Builds per-shape demand from queued work
///
/// One [`ResourceDemand`] is emitted per scheduling class with queued work,
/// in class-id order, capped at `max_shapes` entries. `resource_load` always
/// covers every queued request.
pub struct SchedulerResourceReporter<'a> {
    class_index: &'a SchedulingClassIndex,
    tasks_to_schedule: &'a WorkQueue,
    infeasible_tasks: &'a WorkQueue,
    max_shapes: usize,
}

impl<'a> SchedulerResourceReporter<'a> {
    pub fn new(
        class_index: &'a SchedulingClassIndex,
        tasks_to_schedule: &'a WorkQueue,
        infeasible_tasks: &'a WorkQueue,
        max_shapes: usize,
    ) -> Self {
        Self {
            class_index,
            tasks_to_schedule,
            infeasible_tasks,
            max_shapes,
        }
    }

    /// Fill `resource_load` and `resource_load_by_shape` with every queued request
    pub fn fill_resource_usage(&self, data: &mut ResourcesData) {
        let mut demands = self.demands(&|_| true);
        data.resource_load = total_load(&demands);
        demands.truncate(self.max_shapes);
        data.resource_load_by_shape = demands;
    }

    /// Fill `resource_load_by_shape` with queued actor creations only
    pub fn fill_pending_actor_info(&self, data: &mut ResourcesData) {
        let mut demands = self.demands(&|work| work.task().is_actor_creation());
        demands.truncate(self.max_shapes);
        data.resource_load_by_shape = demands;
    }

    fn demands(&self, filter: &dyn Fn(&Work) -> bool) -> Vec<ResourceDemand> {
        let mut counts: BTreeMap<SchedulingClass, (u64, u64)> = BTreeMap::new();
        for (class, bucket) in self.tasks_to_schedule.iter() {
            let n = bucket.iter().filter(|w| filter(*w)).count() as u64;
            if n > 0 {
                counts.entry(class).or_default().0 += n;
            }
        }
        for (class, bucket) in self.infeasible_tasks.iter() {
            let n = bucket.iter().filter(|w| filter(*w)).count() as u64;
            if n > 0 {
                counts.entry(class).or_default().1 += n;
            }
        }

        counts
            .into_iter()
            .filter_map(|(class, (ready, infeasible))| {
                let descriptor = self.class_index.descriptor(class)?;
                Some(ResourceDemand {
                    shape: descriptor.resources.clone(),
                    num_ready_requests_queued: ready,
                    num_infeasible_requests_queued: infeasible,
                })
            })
            .collect()
    }
}

fn total_load(demands: &[ResourceDemand]) -> ResourceSet {
    let mut load = ResourceSet::new();
    for demand in demands {
        load.add(&demand.shape.scaled(demand.total_queued()));
    }
    load
}
