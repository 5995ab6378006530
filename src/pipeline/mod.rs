//! The ingestion pipeline.
//!
//! One task owns the connection, the flow buffer, the filter engine and the
//! event bus. Frames come in from the connection manager, are published on the
//! bus, appended to the buffer, and the filtered view is recomputed. Consumers
//! drive it through a [`PipelineHandle`].

pub mod bus;
pub mod handle;

use log::{debug, info, trace};
use std::collections::VecDeque;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::buffer::FlowBuffer;
use crate::codec::ControlMessage;
use crate::connection::{ConnectionManager, Connector};
use crate::filter::{Debouncer, FilterEngine, FilteredView};
use crate::models::config::PipelineConfig;
use crate::models::events::{ConnectionState, EventKind, PipelineEvent};
use crate::models::flow::FlowRecord;

pub use bus::{EventBus, Handler, SubscriptionId};
pub use handle::PipelineHandle;

use handle::Command;

/// What woke the pipeline loop
enum Step {
    Events(Vec<PipelineEvent>),
    Command(Option<Command>),
    QuickTextSettled,
    Ping,
}

pub struct Pipeline {
    connection: ConnectionManager,
    bus: EventBus,
    buffer: FlowBuffer,
    filter: FilterEngine,
    debounce: Debouncer,
    ping_period: Option<Duration>,
    /// Built by `run`; an `Interval` needs the runtime
    ping: Option<Interval>,
    commands: mpsc::UnboundedReceiver<Command>,
    view_tx: watch::Sender<FilteredView>,
    focus_tx: watch::Sender<Option<Arc<FlowRecord>>>,
}

impl Pipeline {
    /// Build a pipeline and its handle. Nothing happens until [`Pipeline::run`]
    /// is polled and the handle asks to connect. Needs no runtime.
    pub fn new(config: PipelineConfig, connector: impl Connector) -> (Self, PipelineHandle) {
        let connection = ConnectionManager::new(&config, Box::new(connector));
        let filter = FilterEngine::new();
        let bus = EventBus::new();

        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(filter.view());
        let (focus_tx, focus_rx) = watch::channel(None);

        let handle = PipelineHandle::new(
            commands_tx,
            view_rx,
            focus_rx,
            connection.watch_state(),
            bus.stream(),
        );

        let pipeline = Self {
            connection,
            bus,
            buffer: FlowBuffer::new(config.capacity),
            filter,
            debounce: Debouncer::new(config.debounce()),
            ping_period: config.ping_interval(),
            ping: None,
            commands,
            view_tx,
            focus_tx,
        };
        (pipeline, handle)
    }

    /// Register a handler before the pipeline starts
    pub fn on(&mut self, kind: EventKind, handler: Handler) -> SubscriptionId {
        self.bus.on(kind, handler)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until shut down or every handle is dropped
    pub async fn run(mut self) {
        info!("Pipeline started");
        self.ping = self.ping_period.map(|period| {
            let mut ping = interval_at(Instant::now() + period, period);
            ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ping
        });

        loop {
            let connected = self.connection.state() == ConnectionState::Connected;

            let step = tokio::select! {
                events = self.connection.next_events() => Step::Events(events),
                command = self.commands.recv() => Step::Command(command),
                _ = self.debounce.elapsed() => Step::QuickTextSettled,
                _ = poll_ping(&mut self.ping), if connected => Step::Ping,
            };

            match step {
                Step::Events(events) => self.publish(events),
                Step::Command(None) | Step::Command(Some(Command::Shutdown)) => break,
                Step::Command(Some(command)) => self.apply(command),
                Step::QuickTextSettled => {
                    debug!("Quick filter settled on '{}'", self.filter.quick_text());
                    self.refresh_view();
                }
                Step::Ping => {
                    let events = self.connection.send(ControlMessage::ping());
                    self.publish(events);
                }
            }
        }

        let events = self.connection.disconnect();
        self.publish(events);
        info!("Pipeline stopped");
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Connect(waiter) => self.connection.connect(Some(waiter)),
            Command::Disconnect => {
                let events = self.connection.disconnect();
                self.publish(events);
            }
            Command::Send(message) => {
                let events = self.connection.send(message);
                self.publish(events);
            }
            Command::SetFilter(spec) => {
                self.filter.set_filter(spec);
                self.refresh_view();
            }
            Command::SetQuickText(text) => {
                if self.filter.set_quick_text(&text) {
                    self.debounce.schedule();
                }
            }
            Command::SetCapacity(capacity) => {
                let evicted = self.buffer.set_capacity(capacity);
                if evicted > 0 {
                    debug!("Capacity change evicted {} records", evicted);
                }
                self.sync_focus();
                self.refresh_view();
            }
            Command::Clear => {
                self.buffer.clear();
                self.sync_focus();
                self.refresh_view();
            }
            Command::Focus(id, reply) => {
                let focused = match id {
                    Some(id) => self.buffer.focus(&id),
                    None => {
                        self.buffer.unfocus();
                        None
                    }
                };
                self.sync_focus();
                let _ = reply.send(focused);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.buffer.snapshot());
            }
            Command::Subscribe(kind, handler, reply) => {
                let _ = reply.send(self.bus.on(kind, handler));
            }
            Command::Unsubscribe(id, reply) => {
                let _ = reply.send(self.bus.off(id));
            }
            // Handled by the loop
            Command::Shutdown => {}
        }
    }

    fn publish(&mut self, events: Vec<PipelineEvent>) {
        let mut pending = VecDeque::from(events);
        while let Some(event) = pending.pop_front() {
            self.bus.emit(&event);

            match &event {
                // Listeners have seen `Error`; now move on to `Disconnected`
                PipelineEvent::Error { .. } => pending.extend(self.connection.settle_error()),
                PipelineEvent::Flow(record) => {
                    trace!("Flow {} {} {}", record.id, record.method, record.url);
                    self.buffer.append(record.clone());
                    self.sync_focus();
                    self.refresh_view();
                }
                PipelineEvent::Connected => {
                    if let Some(ping) = &mut self.ping {
                        ping.reset();
                    }
                }
                _ => {}
            }
        }
    }

    /// Recompute now with the latest quick text; supersedes a pending debounce
    fn refresh_view(&mut self) {
        self.debounce.cancel();
        if let Some(view) = self.filter.refresh(self.buffer.iter()) {
            self.view_tx.send_replace(view);
        }
    }

    fn sync_focus(&mut self) {
        let current = self.buffer.focused().cloned();
        self.focus_tx.send_if_modified(|focused| {
            let same = match (&*focused, &current) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            if !same {
                *focused = current;
            }
            !same
        });
    }
}

async fn poll_ping(ping: &mut Option<Interval>) {
    match ping {
        Some(ping) => {
            ping.tick().await;
        }
        None => pending().await,
    }
}
