//! Single-threaded event loop
//!
//! The loop owns a state value `S` and runs posted handlers one at a time,
//! each with `&mut S`. Callers anywhere in the process hold an
//! [`EventLoopHandle`] and enter the state only by posting handlers, so the
//! state needs no locking. Every handler is tagged with a name and
//! instrumented through an [`EventTracker`].

use nodesched_core::{NodeschedError, NodeschedResult};
use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::stats::EventTracker;
use crate::traits::{Executor, Handler};

static NEXT_LOOP_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// Id of the loop whose handler is executing on this thread (0 = none)
    static CURRENT_LOOP: Cell<usize> = const { Cell::new(0) };
}

struct Event<S> {
    name: String,
    handler: Handler<S>,
    enqueued_at: Instant,
}

enum Message<S> {
    Run(Event<S>),
    Stop,
}

struct Shared<S> {
    id: usize,
    tx: mpsc::UnboundedSender<Message<S>>,
    inline: Mutex<VecDeque<Event<S>>>,
    runtime: Handle,
    stats: EventTracker,
}

impl<S> Shared<S> {
    fn send(&self, event: Event<S>) -> NodeschedResult<()> {
        let name = event.name.clone();
        self.tx.send(Message::Run(event)).map_err(|_| {
            self.stats.record_dropped(&name);
            NodeschedError::EventLoop(format!("event loop stopped, dropping handler {}", name))
        })
    }

    fn on_loop_thread(&self) -> bool {
        CURRENT_LOOP.with(|current| current.get() == self.id)
    }
}

/// Cloneable handle for posting handlers onto an [`EventLoop`]
pub struct EventLoopHandle<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for EventLoopHandle<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: 'static> EventLoopHandle<S> {
    /// Ask the loop to stop once every handler queued so far has run
    pub fn stop(&self) {
        if self.shared.tx.send(Message::Stop).is_err() {
            debug!(loop_id = self.shared.id, "Event loop already stopped");
        }
    }

    /// Whether the caller is currently running inside a handler of this loop
    pub fn is_on_loop_thread(&self) -> bool {
        self.shared.on_loop_thread()
    }
}

impl<S: 'static> Executor<S> for EventLoopHandle<S> {
    fn post_handler(
        &self,
        handler: Handler<S>,
        name: &str,
        delay: Duration,
    ) -> NodeschedResult<()> {
        if self.shared.tx.is_closed() {
            return Err(NodeschedError::EventLoop(format!(
                "event loop stopped, cannot post {}",
                name
            )));
        }

        self.shared.stats.record_posted(name);
        let event = Event {
            name: name.to_string(),
            handler,
            enqueued_at: Instant::now(),
        };

        if delay.is_zero() {
            return self.shared.send(event);
        }

        let shared = Arc::clone(&self.shared);
        self.shared.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let event = Event {
                enqueued_at: Instant::now(),
                ..event
            };
            if let Err(e) = shared.send(event) {
                debug!(error = %e, "Delayed handler not delivered");
            }
        });
        Ok(())
    }

    fn dispatch_handler(&self, handler: Handler<S>, name: &str) -> NodeschedResult<()> {
        if !self.shared.on_loop_thread() {
            return self.post_handler(handler, name, Duration::ZERO);
        }

        self.shared.stats.record_posted(name);
        let mut inline = self.shared.inline.lock().unwrap_or_else(|e| e.into_inner());
        inline.push_back(Event {
            name: name.to_string(),
            handler,
            enqueued_at: Instant::now(),
        });
        Ok(())
    }

    fn stats(&self) -> EventTracker {
        self.shared.stats.clone()
    }
}

/// Event loop owning state `S`
pub struct EventLoop<S> {
    state: S,
    rx: mpsc::UnboundedReceiver<Message<S>>,
    shared: Arc<Shared<S>>,
}

impl<S: 'static> EventLoop<S> {
    /// Create a loop around `state`; must be called inside a tokio runtime
    pub fn new(state: S) -> NodeschedResult<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            NodeschedError::EventLoop(format!("event loop requires a tokio runtime: {}", e))
        })?;
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            id: NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed),
            tx,
            inline: Mutex::new(VecDeque::new()),
            runtime,
            stats: EventTracker::new(),
        });

        Ok(Self { state, rx, shared })
    }

    /// Handle for posting handlers
    pub fn handle(&self) -> EventLoopHandle<S> {
        EventLoopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run handlers until [`EventLoopHandle::stop`] is processed, then
    /// return the state
    pub async fn run(mut self) -> S {
        info!(loop_id = self.shared.id, "Event loop started");

        while let Some(message) = self.rx.recv().await {
            match message {
                Message::Run(event) => {
                    self.execute(event);
                    self.drain_inline();
                }
                Message::Stop => break,
            }
        }

        self.rx.close();
        info!(loop_id = self.shared.id, "Event loop stopped");
        self.state
    }

    fn execute(&mut self, event: Event<S>) {
        let queueing = event.enqueued_at.elapsed();
        let started = Instant::now();

        CURRENT_LOOP.with(|current| current.set(self.shared.id));
        (event.handler)(&mut self.state);
        CURRENT_LOOP.with(|current| current.set(0));

        self.shared
            .stats
            .record_executed(&event.name, queueing, started.elapsed());
    }

    fn drain_inline(&mut self) {
        loop {
            let next = self
                .shared
                .inline
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            match next {
                Some(event) => self.execute(event),
                None => break,
            }
        }
    }
}

/// Post `handler` every `interval` until the loop stops
pub fn post_periodic<S, E, F>(
    executor: E,
    name: &str,
    interval: Duration,
    handler: F,
) -> NodeschedResult<()>
where
    S: 'static,
    E: Executor<S> + Clone + 'static,
    F: Fn(&mut S) + Send + Sync + 'static,
{
    schedule_next(executor, name.to_string(), interval, Arc::new(handler))
}

fn schedule_next<S, E, F>(
    executor: E,
    name: String,
    interval: Duration,
    handler: Arc<F>,
) -> NodeschedResult<()>
where
    S: 'static,
    E: Executor<S> + Clone + 'static,
    F: Fn(&mut S) + Send + Sync + 'static,
{
    let next_executor = executor.clone();
    let next_name = name.clone();
    executor.post_handler(
        Box::new(move |state: &mut S| {
            handler(state);
            if let Err(e) = schedule_next(next_executor, next_name, interval, handler) {
                debug!(error = %e, "Periodic handler not re-armed");
            }
        }),
        &name,
        interval,
    )
}
