//! Typed publish/subscribe registry.
//!
//! Handlers are registered per [`EventKind`] and run synchronously, in
//! registration order, on the pipeline task. A handler that fails or panics
//! is logged and skipped; the remaining handlers still run. Async consumers
//! can instead take a broadcast receiver of every event.

use log::{error, trace, warn};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::broadcast;

use crate::models::events::{EventKind, PipelineEvent};

/// Capacity of the broadcast stream; slow receivers see `Lagged`
const STREAM_CAPACITY: usize = 1024;

/// Synchronous event handler
pub type Handler = Box<dyn FnMut(&PipelineEvent) -> anyhow::Result<()> + Send>;

/// Returned by [`EventBus::on`], used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct EventBus {
    handlers: HashMap<EventKind, Vec<(SubscriptionId, Handler)>>,
    next_id: u64,
    stream: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (stream, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            handlers: HashMap::new(),
            next_id: 1,
            stream,
        }
    }

    /// Register a handler for one kind of event
    pub fn on(&mut self, kind: EventKind, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.handlers.entry(kind).or_default().push((id, handler));
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn off(&mut self, id: SubscriptionId) -> bool {
        for handlers in self.handlers.values_mut() {
            if let Some(pos) = handlers.iter().position(|(h, _)| *h == id) {
                handlers.remove(pos);
                return true;
            }
        }
        false
    }

    /// Sender side of the broadcast stream, for handing out receivers
    pub fn stream(&self) -> broadcast::Sender<PipelineEvent> {
        self.stream.clone()
    }

    /// Deliver an event to every handler of its kind, then to the stream.
    ///
    /// Returns how many handlers failed.
    pub fn emit(&mut self, event: &PipelineEvent) -> usize {
        let kind = event.kind();
        let mut failed = 0;

        if let Some(handlers) = self.handlers.get_mut(&kind) {
            for (id, handler) in handlers.iter_mut() {
                match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        failed += 1;
                        warn!("Handler {:?} for {:?} failed: {:#}", id, kind, e);
                    }
                    Err(_) => {
                        failed += 1;
                        error!("Handler {:?} for {:?} panicked", id, kind);
                    }
                }
            }
        }

        // No receivers is fine
        if self.stream.send(event.clone()).is_err() {
            trace!("No stream receivers for {:?}", kind);
        }

        failed
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
