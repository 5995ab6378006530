//! Dual-format frame codec.
//!
//! Binary frames carry flow records; text frames carry JSON control signals.
//! Which decoder runs is decided by the transport's framing type alone.

pub mod control;
pub mod flow_parser;
pub mod wire;

use log::warn;

use crate::models::flow::FlowRecord;
use crate::utils::error::PipelineResult;

pub use control::{ControlEvent, ControlMessage};
pub use flow_parser::FlowParser;

/// A raw inbound or outbound frame, tagged by transport framing type
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
}

/// Result of decoding one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    Flow(FlowRecord),
    Control(ControlEvent),
}

/// Decodes inbound frames and encodes outbound control messages
pub struct MessageCodec {
    flow_parser: FlowParser,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self {
            flow_parser: FlowParser::new(),
        }
    }

    /// Decode a frame, returning the typed error on failure
    pub fn try_decode(&self, frame: &Frame) -> PipelineResult<DecodedMessage> {
        match frame {
            Frame::Binary(data) => self.flow_parser.parse_frame(data).map(DecodedMessage::Flow),
            Frame::Text(text) => control::parse_control(text).map(DecodedMessage::Control),
        }
    }

    /// Decode a frame; failures are logged and the frame is dropped
    pub fn decode(&self, frame: &Frame) -> Option<DecodedMessage> {
        match self.try_decode(frame) {
            Ok(message) => Some(message),
            Err(e) => {
                let size = match frame {
                    Frame::Binary(data) => data.len(),
                    Frame::Text(text) => text.len(),
                };
                warn!("Dropping inbound frame ({} bytes): {}", size, e);
                None
            }
        }
    }

    /// Encode an outbound control message as a text frame
    pub fn encode(&self, message: &ControlMessage) -> PipelineResult<Frame> {
        control::encode_control(message).map(Frame::Text)
    }

    /// Encode a flow record as a binary frame
    pub fn encode_flow(&self, record: &FlowRecord) -> Frame {
        Frame::Binary(wire::WireEnvelope::flow(FlowParser::to_wire(record)).to_frame())
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::wire::{WireEnvelope, WireFlow};

    #[test]
    fn test_dispatch_by_framing_type() {
        let codec = MessageCodec::new();

        let flow = WireEnvelope::flow(WireFlow {
            id: "1".to_string(),
            method: "GET".to_string(),
            url: "http://a/".to_string(),
            ..Default::default()
        });
        assert!(matches!(
            codec.decode(&Frame::Binary(flow.to_frame())),
            Some(DecodedMessage::Flow(_))
        ));

        // A JSON object inside a binary frame is not a control message
        let json = br#"{"type":"pong"}"#.to_vec();
        assert!(codec.decode(&Frame::Binary(json)).is_none());

        assert_eq!(
            codec.decode(&Frame::Text(r#"{"type":"pong"}"#.to_string())),
            Some(DecodedMessage::Control(ControlEvent::Pong))
        );
    }

    #[test]
    fn test_decode_drops_bad_text() {
        let codec = MessageCodec::new();
        assert!(codec.decode(&Frame::Text("nope".to_string())).is_none());
    }

    #[test]
    fn test_encode_flow_round_trip() {
        let codec = MessageCodec::new();
        let record = FlowParser::new().build_record(WireFlow {
            id: "42".to_string(),
            method: "DELETE".to_string(),
            url: "http://a/items/1".to_string(),
            status: Some(204),
            start_timestamp: 5.0,
            end_timestamp: 5.002,
            ..Default::default()
        });

        match codec.decode(&codec.encode_flow(&record)) {
            Some(DecodedMessage::Flow(decoded)) => assert_eq!(decoded, record),
            other => panic!("unexpected {:?}", other),
        }
    }
}
