//! # Binary Envelope Definitions
//!
//! Protobuf messages carried in binary WebSocket frames. Each frame holds one
//! varint length-prefixed [`WireEnvelope`]; its `data_type` says which payload
//! variant follows. Only [`MessageKind::FlowData`] is consumed by the pipeline.

use prost::Message;

/// Discriminator for the envelope payload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MessageKind {
    Unspecified = 0,
    /// A captured flow record
    FlowData = 1,
    /// Interception server lifecycle notice
    ServerEvent = 2,
}

/// Top-level binary frame
#[derive(Clone, PartialEq, Message)]
pub struct WireEnvelope {
    /// Free-form label set by the sender (e.g. "flow_event")
    #[prost(string, tag = "1")]
    pub kind: String,

    /// Which payload variant this envelope carries. Maps to [`MessageKind`].
    #[prost(enumeration = "MessageKind", tag = "2")]
    pub data_type: i32,

    #[prost(oneof = "Payload", tags = "3, 4")]
    pub payload: Option<Payload>,
}

/// Envelope payload variants
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum Payload {
    #[prost(message, tag = "3")]
    Flow(WireFlow),

    #[prost(message, tag = "4")]
    ServerEvent(WireServerEvent),
}

/// A header entry; either side may be missing from a sloppy sender
#[derive(Clone, PartialEq, Message)]
pub struct WireHeader {
    #[prost(string, optional, tag = "1")]
    pub key: Option<String>,

    #[prost(string, optional, tag = "2")]
    pub value: Option<String>,
}

/// Flow record as sent by the interception backend
#[derive(Clone, PartialEq, Message)]
pub struct WireFlow {
    #[prost(string, tag = "1")]
    pub id: String,

    #[prost(string, tag = "2")]
    pub method: String,

    #[prost(string, tag = "3")]
    pub url: String,

    /// Absent (or 0) while the exchange is in flight
    #[prost(int32, optional, tag = "4")]
    pub status: Option<i32>,

    /// Seconds
    #[prost(double, tag = "5")]
    pub start_timestamp: f64,

    /// Seconds, 0 while in flight
    #[prost(double, tag = "6")]
    pub end_timestamp: f64,

    #[prost(uint64, tag = "7")]
    pub request_size: u64,

    #[prost(uint64, tag = "8")]
    pub response_size: u64,

    #[prost(message, repeated, tag = "9")]
    pub request_headers: Vec<WireHeader>,

    #[prost(message, repeated, tag = "10")]
    pub response_headers: Vec<WireHeader>,

    #[prost(string, tag = "11")]
    pub request_body: String,

    #[prost(string, tag = "12")]
    pub response_body: String,

    #[prost(bool, tag = "13")]
    pub is_intercepted: bool,
}

/// Interception server started/stopped notice
#[derive(Clone, PartialEq, Message)]
pub struct WireServerEvent {
    #[prost(string, tag = "1")]
    pub status: String,

    #[prost(uint32, tag = "2")]
    pub port: u32,
}

impl WireEnvelope {
    /// Wrap a flow in an envelope
    pub fn flow(flow: WireFlow) -> Self {
        Self {
            kind: "flow_event".to_string(),
            data_type: MessageKind::FlowData as i32,
            payload: Some(Payload::Flow(flow)),
        }
    }

    /// Wrap a server event in an envelope
    pub fn server_event(status: &str, port: u32) -> Self {
        Self {
            kind: "server_event".to_string(),
            data_type: MessageKind::ServerEvent as i32,
            payload: Some(Payload::ServerEvent(WireServerEvent {
                status: status.to_string(),
                port,
            })),
        }
    }

    /// Serialize with the varint length prefix
    pub fn to_frame(&self) -> Vec<u8> {
        self.encode_length_delimited_to_vec()
    }
}
