//! Per-handler event statistics

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Aggregate counters for one handler name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandlerStats {
    /// Handlers posted in total
    pub cum_count: u64,
    /// Handlers posted but not yet executed
    pub curr_count: u64,
    /// Total time spent queued, in microseconds
    pub cum_queueing_time_us: u64,
    /// Total time spent executing, in microseconds
    pub cum_execution_time_us: u64,
    /// Longest single execution, in microseconds
    pub max_execution_time_us: u64,
}

/// Thread-safe tracker of handler statistics keyed by handler name
#[derive(Debug, Clone, Default)]
pub struct EventTracker {
    inner: Arc<Mutex<BTreeMap<String, HandlerStats>>>,
}

impl EventTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, HandlerStats>> {
        // Poisoned locks still hold consistent counters.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record that a handler was posted
    pub fn record_posted(&self, name: &str) {
        let mut stats = self.lock();
        let entry = stats.entry(name.to_string()).or_default();
        entry.cum_count += 1;
        entry.curr_count += 1;
    }

    /// Record that a posted handler was dropped without running
    pub fn record_dropped(&self, name: &str) {
        if let Some(entry) = self.lock().get_mut(name) {
            entry.curr_count = entry.curr_count.saturating_sub(1);
        }
    }

    /// Record a completed execution
    pub fn record_executed(&self, name: &str, queueing: Duration, execution: Duration) {
        let mut stats = self.lock();
        let entry = stats.entry(name.to_string()).or_default();
        let execution_us = execution.as_micros() as u64;
        entry.curr_count = entry.curr_count.saturating_sub(1);
        entry.cum_queueing_time_us += queueing.as_micros() as u64;
        entry.cum_execution_time_us += execution_us;
        entry.max_execution_time_us = entry.max_execution_time_us.max(execution_us);
    }

    /// Stats for one handler name
    pub fn get(&self, name: &str) -> Option<HandlerStats> {
        self.lock().get(name).cloned()
    }

    /// Copy of all stats
    pub fn snapshot(&self) -> BTreeMap<String, HandlerStats> {
        self.lock().clone()
    }

    /// Human readable summary, one line per handler
    pub fn summary(&self) -> String {
        let stats = self.lock();
        let mut out = String::new();
        let total: u64 = stats.values().map(|s| s.cum_count).sum();
        let _ = writeln!(out, "Global stats: {} total ({} handlers)", total, stats.len());
        for (name, s) in stats.iter() {
            let mean_exec = if s.cum_count > s.curr_count {
                s.cum_execution_time_us / (s.cum_count - s.curr_count)
            } else {
                0
            };
            let _ = writeln!(
                out,
                "\t{} - {} total ({} active), Execution time: mean = {} us, total = {} us, \
                 Queueing time: total = {} us",
                name,
                s.cum_count,
                s.curr_count,
                mean_exec,
                s.cum_execution_time_us,
                s.cum_queueing_time_us
            );
        }
        out
    }
}
