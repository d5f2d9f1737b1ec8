//! Work envelope: a queued lease request with its reply callback

use nodesched_core::{LeaseReply, SchedulingFailureType, Task};
use std::fmt;
use tokio::sync::oneshot;
use tracing::warn;

use crate::class_index::SchedulingClass;

/// Lifecycle state of a [`Work`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    /// Waiting in the pending queue
    Queued,
    /// Parked in the infeasible queue
    Infeasible,
    /// Owned by the local dispatcher
    HandedOff,
    /// Removed by cancellation
    Cancelled,
    /// Answered with a spillback or rejection
    Replied,
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkStatus::Queued => write!(f, "Queued"),
            WorkStatus::Infeasible => write!(f, "Infeasible"),
            WorkStatus::HandedOff => write!(f, "HandedOff"),
            WorkStatus::Cancelled => write!(f, "Cancelled"),
            WorkStatus::Replied => write!(f, "Replied"),
        }
    }
}

/// Consume-once continuation answering a lease request
///
/// `send` takes the callback by value, so a reply can be delivered at most
/// once. Dropping an unanswered callback logs a warning.
#[must_use = "a lease request must be answered exactly once"]
pub struct LeaseReplyCallback {
    callback: Option<Box<dyn FnOnce(LeaseReply) + Send + 'static>>,
}

impl LeaseReplyCallback {
    /// Wrap a closure
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(LeaseReply) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// Callback that forwards the reply into a oneshot channel
    pub fn channel() -> (Self, oneshot::Receiver<LeaseReply>) {
        let (tx, rx) = oneshot::channel();
        let callback = Self::new(move |reply| {
            // The requester may have gone away; nothing left to notify.
            let _ = tx.send(reply);
        });
        (callback, rx)
    }

    /// Deliver the reply
    pub fn send(mut self, reply: LeaseReply) {
        if let Some(callback) = self.callback.take() {
            callback(reply);
        }
    }
}

impl Drop for LeaseReplyCallback {
    fn drop(&mut self) {
        if self.callback.is_some() {
            warn!("Lease reply callback dropped without a reply");
        }
    }
}

impl fmt::Debug for LeaseReplyCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseReplyCallback")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

/// A lease request travelling through the scheduler
///
/// `Work` is deliberately not `Clone`: it lives in exactly one queue (or with
/// the local dispatcher) at a time and is consumed when answered.
#[derive(Debug)]
pub struct Work {
    task: Task,
    scheduling_class: SchedulingClass,
    /// Grant locally or reject, never spill back
    pub grant_or_reject: bool,
    /// The requester picked this node for data locality
    pub locality_preferred: bool,
    reply: LeaseReplyCallback,
    created_at_ms: i64,
    status: WorkStatus,
}

impl Work {
    /// Wrap a request into a queued work item
    pub fn new(
        task: Task,
        scheduling_class: SchedulingClass,
        grant_or_reject: bool,
        locality_preferred: bool,
        reply: LeaseReplyCallback,
        created_at_ms: i64,
    ) -> Self {
        Self {
            task,
            scheduling_class,
            grant_or_reject,
            locality_preferred,
            reply,
            created_at_ms,
            status: WorkStatus::Queued,
        }
    }

    /// The task being scheduled
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Scheduling class assigned at admission
    pub fn scheduling_class(&self) -> SchedulingClass {
        self.scheduling_class
    }

    /// Admission time in milliseconds
    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    /// Current state
    pub fn status(&self) -> WorkStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: WorkStatus) {
        self.status = status;
    }

    /// Answer the request, consuming the work
    pub fn reply(self, reply: LeaseReply) {
        self.reply.send(reply);
    }

    /// Answer the request with a cancellation
    pub fn cancel(mut self, failure_type: SchedulingFailureType, message: &str) {
        self.status = WorkStatus::Cancelled;
        self.reply(LeaseReply::Rejected {
            failure_type,
            message: message.to_string(),
        });
    }
}
