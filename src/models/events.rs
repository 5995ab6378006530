use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::models::flow::FlowRecord;

/// Lifecycle of the backend connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Everything the pipeline publishes to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Transport opened
    Connected,

    /// Transport closed, with the close code and reason
    Disconnected { code: u16, reason: String },

    /// Connection-level failure
    Error { cause: String },

    /// A decoded flow record
    Flow(Arc<FlowRecord>),

    /// Generic passthrough control message
    Message(serde_json::Value),

    /// Backend reports a new flow
    FlowCreated(serde_json::Value),

    /// Backend reports an updated flow
    FlowUpdated(serde_json::Value),

    InterceptionStarted { port: Option<u16> },

    InterceptionStopped { port: Option<u16> },

    /// Backend answered a keep-alive ping
    Pong,
}

/// Discriminant of [`PipelineEvent`], used to register handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
    Flow,
    Message,
    FlowCreated,
    FlowUpdated,
    InterceptionStarted,
    InterceptionStopped,
    Pong,
}

impl PipelineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PipelineEvent::Connected => EventKind::Connected,
            PipelineEvent::Disconnected { .. } => EventKind::Disconnected,
            PipelineEvent::Error { .. } => EventKind::Error,
            PipelineEvent::Flow(_) => EventKind::Flow,
            PipelineEvent::Message(_) => EventKind::Message,
            PipelineEvent::FlowCreated(_) => EventKind::FlowCreated,
            PipelineEvent::FlowUpdated(_) => EventKind::FlowUpdated,
            PipelineEvent::InterceptionStarted { .. } => EventKind::InterceptionStarted,
            PipelineEvent::InterceptionStopped { .. } => EventKind::InterceptionStopped,
            PipelineEvent::Pong => EventKind::Pong,
        }
    }
}
