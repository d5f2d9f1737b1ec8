//! Scheduler counters and the lazily refreshed queue snapshot

use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::fmt::Write as _;

/// Monotonic counters updated as work moves through the scheduler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerCounters {
    pub num_dispatched_locally: u64,
    pub num_spilled_back: u64,
    pub num_rejected: u64,
    pub num_cancelled: u64,
    pub num_infeasible_announced: u64,
    pub num_revived: u64,
}

/// Point-in-time view of the queues
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub num_pending: usize,
    pub num_infeasible: usize,
    pub num_pending_classes: usize,
    pub num_infeasible_classes: usize,
    pub num_pending_actor_creation: usize,
    pub oldest_pending_created_at_ms: Option<i64>,
}

/// Counters plus a queue snapshot recomputed only after a mutation
///
/// Scheduling paths call [`SchedulerStats::mark_stale`]; the full queue scan
/// runs on the next [`SchedulerStats::snapshot_with`].
#[derive(Debug, Default)]
pub struct SchedulerStats {
    counters: SchedulerCounters,
    snapshot: RefCell<QueueSnapshot>,
    stale: Cell<bool>,
}

impl SchedulerStats {
    /// Create empty stats; the first snapshot request computes it
    pub fn new() -> Self {
        Self {
            stale: Cell::new(true),
            ..Default::default()
        }
    }

    /// Invalidate the cached snapshot
    pub fn mark_stale(&self) {
        self.stale.set(true);
    }

    /// Whether the next snapshot request will rescan the queues
    pub fn is_stale(&self) -> bool {
        self.stale.get()
    }

    /// Mutable counters; marks the snapshot stale
    pub fn counters_mut(&mut self) -> &mut SchedulerCounters {
        self.stale.set(true);
        &mut self.counters
    }

    /// Current counters
    pub fn counters(&self) -> SchedulerCounters {
        self.counters
    }

    /// Cached snapshot, recomputed with `compute` if stale
    pub fn snapshot_with(&self, compute: impl FnOnce() -> QueueSnapshot) -> QueueSnapshot {
        if self.stale.get() {
            *self.snapshot.borrow_mut() = compute();
            self.stale.set(false);
        }
        self.snapshot.borrow().clone()
    }

    /// Publish counters and the snapshot through the `metrics` facade
    pub fn record_metrics(&self, snapshot: &QueueSnapshot) {
        metrics::gauge!("nodesched_scheduler_tasks", "state" => "pending")
            .set(snapshot.num_pending as f64);
        metrics::gauge!("nodesched_scheduler_tasks", "state" => "infeasible")
            .set(snapshot.num_infeasible as f64);
        metrics::gauge!("nodesched_scheduler_scheduling_classes", "state" => "pending")
            .set(snapshot.num_pending_classes as f64);
        metrics::gauge!("nodesched_scheduler_scheduling_classes", "state" => "infeasible")
            .set(snapshot.num_infeasible_classes as f64);
        metrics::gauge!("nodesched_scheduler_pending_actor_creations")
            .set(snapshot.num_pending_actor_creation as f64);

        let c = &self.counters;
        metrics::counter!("nodesched_scheduler_dispatched_total")
            .absolute(c.num_dispatched_locally);
        metrics::counter!("nodesched_scheduler_spillbacks_total").absolute(c.num_spilled_back);
        metrics::counter!("nodesched_scheduler_rejections_total").absolute(c.num_rejected);
        metrics::counter!("nodesched_scheduler_cancellations_total").absolute(c.num_cancelled);
        metrics::counter!("nodesched_scheduler_infeasible_announcements_total")
            .absolute(c.num_infeasible_announced);
        metrics::counter!("nodesched_scheduler_revived_total").absolute(c.num_revived);
    }

    /// Debug dump header and counters
    pub fn debug_str(&self, snapshot: &QueueSnapshot, now_ms: i64) -> String {
        let c = &self.counters;
        let mut out = String::new();
        let _ = writeln!(out, "========== ClusterTaskManager ==========");
        let _ = writeln!(
            out,
            "Pending tasks: {} in {} classes",
            snapshot.num_pending, snapshot.num_pending_classes
        );
        let _ = writeln!(
            out,
            "Infeasible tasks: {} in {} classes",
            snapshot.num_infeasible, snapshot.num_infeasible_classes
        );
        let _ = writeln!(
            out,
            "Pending actor creations: {}",
            snapshot.num_pending_actor_creation
        );
        if let Some(created_at) = snapshot.oldest_pending_created_at_ms {
            let _ = writeln!(out, "Oldest pending task age: {}ms", now_ms - created_at);
        }
        let _ = writeln!(
            out,
            "Dispatched locally: {} Spilled back: {} Rejected: {} Cancelled: {}",
            c.num_dispatched_locally, c.num_spilled_back, c.num_rejected, c.num_cancelled
        );
        let _ = writeln!(
            out,
            "Infeasible announcements: {} Revived: {}",
            c.num_infeasible_announced, c.num_revived
        );
        out
    }
}
