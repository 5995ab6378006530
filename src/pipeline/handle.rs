use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::codec::ControlMessage;
use crate::filter::FilteredView;
use crate::models::events::{ConnectionState, EventKind, PipelineEvent};
use crate::models::filter::FilterSpec;
use crate::models::flow::FlowRecord;
use crate::pipeline::bus::{Handler, SubscriptionId};
use crate::utils::error::{PipelineError, PipelineResult};

/// Requests sent to the pipeline task
pub(crate) enum Command {
    Connect(oneshot::Sender<PipelineResult<()>>),
    Disconnect,
    Send(ControlMessage),
    SetFilter(Option<FilterSpec>),
    SetQuickText(String),
    SetCapacity(usize),
    Clear,
    Focus(Option<String>, oneshot::Sender<Option<Arc<FlowRecord>>>),
    Snapshot(oneshot::Sender<Vec<Arc<FlowRecord>>>),
    Subscribe(EventKind, Handler, oneshot::Sender<SubscriptionId>),
    Unsubscribe(SubscriptionId, oneshot::Sender<bool>),
    Shutdown,
}

/// Cloneable front door to a running [`Pipeline`](crate::pipeline::Pipeline).
///
/// Mutations are queued to the pipeline task and applied in order. Reads go
/// through `watch` receivers and never block the task.
#[derive(Clone)]
pub struct PipelineHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<FilteredView>,
    focused: watch::Receiver<Option<Arc<FlowRecord>>>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<PipelineEvent>,
}

impl PipelineHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        view: watch::Receiver<FilteredView>,
        focused: watch::Receiver<Option<Arc<FlowRecord>>>,
        state: watch::Receiver<ConnectionState>,
        events: broadcast::Sender<PipelineEvent>,
    ) -> Self {
        Self {
            commands,
            view,
            focused,
            state,
            events,
        }
    }

    fn command(&self, command: Command) -> PipelineResult<()> {
        self.commands
            .send(command)
            .map_err(|_| PipelineError::PipelineClosed)
    }

    async fn request<T>(&self, command: Command, reply: oneshot::Receiver<T>) -> PipelineResult<T> {
        self.command(command)?;
        reply.await.map_err(|_| PipelineError::PipelineClosed)
    }

    /// Open the connection. Resolves once the attempt in flight (this one or
    /// one already running) succeeds or fails.
    pub async fn connect(&self) -> PipelineResult<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Connect(tx), rx).await?
    }

    /// Intentional close; no reconnect follows
    pub fn disconnect(&self) -> PipelineResult<()> {
        self.command(Command::Disconnect)
    }

    /// Send a control message, queued while not connected
    pub fn send(&self, message: ControlMessage) -> PipelineResult<()> {
        self.command(Command::Send(message))
    }

    pub fn set_filter(&self, spec: Option<FilterSpec>) -> PipelineResult<()> {
        self.command(Command::SetFilter(spec))
    }

    /// Update the quick filter. The view follows after the debounce window.
    pub fn set_quick_text(&self, text: impl Into<String>) -> PipelineResult<()> {
        self.command(Command::SetQuickText(text.into()))
    }

    pub fn set_capacity(&self, capacity: usize) -> PipelineResult<()> {
        self.command(Command::SetCapacity(capacity))
    }

    /// Drop every buffered record and the focus
    pub fn clear(&self) -> PipelineResult<()> {
        self.command(Command::Clear)
    }

    /// Focus the newest buffered record with this id
    pub async fn focus(&self, id: impl Into<String>) -> PipelineResult<Option<Arc<FlowRecord>>> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Focus(Some(id.into()), tx), rx).await
    }

    pub async fn unfocus(&self) -> PipelineResult<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Focus(None, tx), rx).await.map(|_| ())
    }

    /// Every buffered record, oldest first, ignoring filters
    pub async fn snapshot(&self) -> PipelineResult<Vec<Arc<FlowRecord>>> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Snapshot(tx), rx).await
    }

    /// Register a synchronous handler; it runs on the pipeline task
    pub async fn on(&self, kind: EventKind, handler: Handler) -> PipelineResult<SubscriptionId> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Subscribe(kind, handler, tx), rx).await
    }

    pub async fn off(&self, id: SubscriptionId) -> PipelineResult<bool> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Unsubscribe(id, tx), rx).await
    }

    /// Stop the pipeline task after an intentional disconnect
    pub fn shutdown(&self) -> PipelineResult<()> {
        self.command(Command::Shutdown)
    }

    /// Receiver of the filtered view; changes only when the view does
    pub fn view(&self) -> watch::Receiver<FilteredView> {
        self.view.clone()
    }

    pub fn current_view(&self) -> FilteredView {
        self.view.borrow().clone()
    }

    pub fn focused(&self) -> watch::Receiver<Option<Arc<FlowRecord>>> {
        self.focused.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stream of every published event
    pub fn events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }
}
