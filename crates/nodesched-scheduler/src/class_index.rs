//! Scheduling classes
//!
//! Tasks that share a resource shape and placement constraints are
//! interchangeable for queueing and placement. The index interns each
//! distinct [`SchedulingClassDescriptor`] and hands out a small, stable
//! [`SchedulingClass`] id in first-seen order.

use nodesched_core::{ResourceSet, SchedulingStrategy, Task};
use std::collections::HashMap;
use std::fmt;

/// Interned scheduling class id
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchedulingClass(u32);

impl SchedulingClass {
    /// Raw id
    pub fn id(&self) -> u32 {
        self.0
    }

    /// The class id following this one
    pub fn next(&self) -> SchedulingClass {
        SchedulingClass(self.0.wrapping_add(1))
    }
}

impl fmt::Display for SchedulingClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything that makes two tasks interchangeable for scheduling
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchedulingClassDescriptor {
    /// Resource shape
    pub resources: ResourceSet,
    /// Function descriptor
    pub function_name: String,
    /// Call depth
    pub depth: u32,
    /// Placement constraint
    pub strategy: SchedulingStrategy,
}

impl SchedulingClassDescriptor {
    /// Descriptor of a task
    pub fn from_task(task: &Task) -> Self {
        Self {
            resources: task.required_resources.clone(),
            function_name: task.name.clone(),
            depth: task.depth,
            strategy: task.scheduling_strategy.clone(),
        }
    }
}

impl fmt::Display for SchedulingClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{depth={} function={} strategy={:?} resources={}}}",
            self.depth, self.function_name, self.strategy, self.resources
        )
    }
}

/// Bidirectional map between descriptors and class ids
#[derive(Debug, Default)]
pub struct SchedulingClassIndex {
    by_descriptor: HashMap<SchedulingClassDescriptor, SchedulingClass>,
    descriptors: Vec<SchedulingClassDescriptor>,
}

impl SchedulingClassIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Class id for a descriptor, interning it if new
    pub fn get_or_insert(&mut self, descriptor: SchedulingClassDescriptor) -> SchedulingClass {
        if let Some(class) = self.by_descriptor.get(&descriptor) {
            return *class;
        }
        let class = SchedulingClass(self.descriptors.len() as u32);
        self.descriptors.push(descriptor.clone());
        self.by_descriptor.insert(descriptor, class);
        class
    }

    /// Class id for a task
    pub fn class_for_task(&mut self, task: &Task) -> SchedulingClass {
        self.get_or_insert(SchedulingClassDescriptor::from_task(task))
    }

    /// Descriptor of a class
    pub fn descriptor(&self, class: SchedulingClass) -> Option<&SchedulingClassDescriptor> {
        self.descriptors.get(class.0 as usize)
    }

    /// Number of interned classes
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether no class has been interned
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
