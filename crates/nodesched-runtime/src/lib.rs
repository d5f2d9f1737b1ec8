//! nodesched-runtime: Event loop executor
//!
//! This crate provides the executor every scheduling handler runs on:
//! - Ordered, optionally delayed posting of named handlers
//! - Inline dispatch when already running on the loop
//! - Per-handler count, queueing time and execution time statistics

pub mod event_loop;
pub mod stats;
pub mod traits;

pub use event_loop::{post_periodic, EventLoop, EventLoopHandle};
pub use stats::{EventTracker, HandlerStats};
pub use traits::{Executor, Handler};
