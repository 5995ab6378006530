//! Client-side ingestion pipeline for an HTTP interception backend.
//!
//! Flow records arrive over a WebSocket as binary frames, control signals as
//! JSON text frames. The [`pipeline::Pipeline`] decodes them, keeps a bounded
//! history, and publishes a filtered view plus typed events.

pub mod buffer;
pub mod codec;
pub mod connection;
pub mod filter;
pub mod models;
pub mod pipeline;
pub mod utils;

pub use connection::{ChannelConnector, Connector, WsConnector};
pub use models::config::PipelineConfig;
pub use models::events::{ConnectionState, EventKind, PipelineEvent};
pub use pipeline::{Pipeline, PipelineHandle};
pub use utils::error::{PipelineError, PipelineResult};
