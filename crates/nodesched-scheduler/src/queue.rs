//! Per-class FIFO work queues

use nodesched_core::TaskId;
use std::collections::{BTreeMap, VecDeque};

use crate::class_index::SchedulingClass;
use crate::work::Work;

/// Work grouped by scheduling class, FIFO within each class
///
/// Buckets are kept in class-id order and empty buckets are removed, so
/// `num_classes` always equals the number of classes with queued work.
#[derive(Debug, Default)]
pub struct WorkQueue {
    buckets: BTreeMap<SchedulingClass, VecDeque<Work>>,
}

impl WorkQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append work at the tail of its class bucket
    pub fn push_back(&mut self, work: Work) {
        self.buckets
            .entry(work.scheduling_class())
            .or_default()
            .push_back(work);
    }

    /// Append a whole bucket after any work already queued for `class`
    pub fn append_bucket(&mut self, class: SchedulingClass, mut bucket: VecDeque<Work>) {
        if bucket.is_empty() {
            return;
        }
        self.buckets.entry(class).or_default().append(&mut bucket);
    }

    /// Put a whole bucket ahead of any work already queued for `class`
    pub fn prepend_bucket(&mut self, class: SchedulingClass, mut bucket: VecDeque<Work>) {
        if bucket.is_empty() {
            return;
        }
        if let Some(existing) = self.buckets.get_mut(&class) {
            bucket.append(existing);
        }
        self.buckets.insert(class, bucket);
    }

    /// Remove and return the bucket of `class`
    pub fn take_bucket(&mut self, class: SchedulingClass) -> Option<VecDeque<Work>> {
        self.buckets.remove(&class)
    }

    /// Head of a class bucket
    pub fn front(&self, class: SchedulingClass) -> Option<&Work> {
        self.buckets.get(&class).and_then(VecDeque::front)
    }

    /// Remove the head of a class bucket
    pub fn pop_front(&mut self, class: SchedulingClass) -> Option<Work> {
        let bucket = self.buckets.get_mut(&class)?;
        let work = bucket.pop_front();
        if bucket.is_empty() {
            self.buckets.remove(&class);
        }
        work
    }

    /// Classes with queued work, in class-id order
    pub fn classes(&self) -> Vec<SchedulingClass> {
        self.buckets.keys().copied().collect()
    }

    /// Classes with queued work, rotated to begin at the first class >= `start`
    pub fn classes_starting_at(&self, start: SchedulingClass) -> Vec<SchedulingClass> {
        self.buckets
            .range(start..)
            .chain(self.buckets.range(..start))
            .map(|(class, _)| *class)
            .collect()
    }

    /// Remove every work matching `predicate`, preserving the order of the rest
    pub fn remove_if(&mut self, predicate: &dyn Fn(&Work) -> bool) -> Vec<Work> {
        let mut removed = Vec::new();
        for bucket in self.buckets.values_mut() {
            let mut kept = VecDeque::with_capacity(bucket.len());
            for work in bucket.drain(..) {
                if predicate(&work) {
                    removed.push(work);
                } else {
                    kept.push_back(work);
                }
            }
            *bucket = kept;
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
        removed
    }

    /// Whether a task is queued
    pub fn contains_task(&self, task_id: &TaskId) -> bool {
        self.iter_works().any(|work| work.task().task_id == *task_id)
    }

    /// Iterate over buckets in class-id order
    pub fn iter(&self) -> impl Iterator<Item = (SchedulingClass, &VecDeque<Work>)> {
        self.buckets.iter().map(|(class, bucket)| (*class, bucket))
    }

    /// Iterate over all queued work, class by class
    pub fn iter_works(&self) -> impl Iterator<Item = &Work> {
        self.buckets.values().flatten()
    }

    /// Number of classes with queued work
    pub fn num_classes(&self) -> usize {
        self.buckets.len()
    }

    /// Total number of queued work items
    pub fn len(&self) -> usize {
        self.buckets.values().map(VecDeque::len).sum()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
