//! Executor trait definitions

use nodesched_core::NodeschedResult;
use std::time::Duration;

use crate::stats::EventTracker;

/// A handler run on the event loop with exclusive access to the loop state
pub type Handler<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

/// Scheduling contract of the event loop that owns state `S`
pub trait Executor<S>: Send + Sync {
    /// Run `handler` once on the loop, after `delay` if nonzero
    fn post_handler(&self, handler: Handler<S>, name: &str, delay: Duration)
        -> NodeschedResult<()>;

    /// Like `post_handler` without delay, but when called from a handler of
    /// the same loop the new handler runs right after the current one,
    /// ahead of anything already queued.
    fn dispatch_handler(&self, handler: Handler<S>, name: &str) -> NodeschedResult<()>;

    /// Per-handler instrumentation
    fn stats(&self) -> EventTracker;

    /// Post a closure to run as soon as possible
    fn post<F>(&self, name: &str, handler: F) -> NodeschedResult<()>
    where
        F: FnOnce(&mut S) + Send + 'static,
        Self: Sized,
    {
        self.post_handler(Box::new(handler), name, Duration::ZERO)
    }

    /// Post a closure to run after `delay`
    fn post_delayed<F>(&self, name: &str, delay: Duration, handler: F) -> NodeschedResult<()>
    where
        F: FnOnce(&mut S) + Send + 'static,
        Self: Sized,
    {
        self.post_handler(Box::new(handler), name, delay)
    }

    /// Dispatch a closure, inline on the loop when already running there
    fn dispatch<F>(&self, name: &str, handler: F) -> NodeschedResult<()>
    where
        F: FnOnce(&mut S) + Send + 'static,
        Self: Sized,
    {
        self.dispatch_handler(Box::new(handler), name)
    }
}
