use log::debug;
use serde::Serialize;
use serde_json::Value;

use crate::models::events::PipelineEvent;
use crate::utils::error::{PipelineError, PipelineResult};

/// Control/status signal decoded from a text frame
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// Generic passthrough notification; carries the whole object
    Message(Value),
    FlowCreated(Value),
    FlowUpdated(Value),
    InterceptionStarted { port: Option<u16> },
    InterceptionStopped { port: Option<u16> },
    Pong,
}

/// Outbound control messages
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "ping")]
    Ping { timestamp: u64 },

    #[serde(rename = "pong")]
    Pong,
}

impl ControlMessage {
    /// Keep-alive ping stamped with the current unix time
    pub fn ping() -> Self {
        ControlMessage::Ping {
            timestamp: chrono::Utc::now().timestamp().max(0) as u64,
        }
    }
}

impl From<ControlEvent> for PipelineEvent {
    fn from(event: ControlEvent) -> Self {
        match event {
            ControlEvent::Message(v) => PipelineEvent::Message(v),
            ControlEvent::FlowCreated(v) => PipelineEvent::FlowCreated(v),
            ControlEvent::FlowUpdated(v) => PipelineEvent::FlowUpdated(v),
            ControlEvent::InterceptionStarted { port } => PipelineEvent::InterceptionStarted { port },
            ControlEvent::InterceptionStopped { port } => PipelineEvent::InterceptionStopped { port },
            ControlEvent::Pong => PipelineEvent::Pong,
        }
    }
}

/// Parse a text frame into a control event
pub fn parse_control(text: &str) -> PipelineResult<ControlEvent> {
    let mut value: Value = serde_json::from_str(text)
        .map_err(|e| PipelineError::UnparseableControlMessage(e.to_string()))?;

    // The backend sometimes serializes twice, leaving the object inside a string
    if let Value::String(inner) = &value {
        debug!("Unwrapping double-encoded control message");
        value = serde_json::from_str(inner)
            .map_err(|e| PipelineError::UnparseableControlMessage(e.to_string()))?;
    }

    let message_type = match value.get("type").and_then(Value::as_str) {
        Some(t) => t.to_string(),
        None => {
            return Err(PipelineError::UnparseableControlMessage(
                "missing 'type' discriminator".to_string(),
            ))
        }
    };

    match message_type.as_str() {
        "message" => Ok(ControlEvent::Message(value)),
        "new_flow" | "flow_created" => Ok(ControlEvent::FlowCreated(value)),
        "flow_updated" | "update_flow" => Ok(ControlEvent::FlowUpdated(value)),
        "interception_status" | "proxy_status" | "server_event" => {
            let port = read_port(&value);
            match value.get("status").and_then(Value::as_str) {
                Some("started") => Ok(ControlEvent::InterceptionStarted { port }),
                Some("stopped") => Ok(ControlEvent::InterceptionStopped { port }),
                other => Err(PipelineError::UnparseableControlMessage(format!(
                    "interception status '{}' is neither started nor stopped",
                    other.unwrap_or("<missing>")
                ))),
            }
        }
        "intercept_started" => Ok(ControlEvent::InterceptionStarted { port: read_port(&value) }),
        "intercept_stopped" => Ok(ControlEvent::InterceptionStopped { port: read_port(&value) }),
        "pong" => Ok(ControlEvent::Pong),
        other => Err(PipelineError::UnparseableControlMessage(format!(
            "unrecognized control type '{}'",
            other
        ))),
    }
}

fn read_port(value: &Value) -> Option<u16> {
    value
        .get("port")
        .and_then(Value::as_u64)
        .and_then(|p| u16::try_from(p).ok())
}

/// Serialize an outbound control message
pub fn encode_control(message: &ControlMessage) -> PipelineResult<String> {
    Ok(serde_json::to_string(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_passthrough() {
        let event = parse_control(r#"{"type":"message","text":"hello"}"#).unwrap();
        match event {
            ControlEvent::Message(v) => assert_eq!(v["text"], "hello"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_legacy_names_are_remapped() {
        assert!(matches!(
            parse_control(r#"{"type":"new_flow","id":"1"}"#),
            Ok(ControlEvent::FlowCreated(_))
        ));
        assert!(matches!(
            parse_control(r#"{"type":"update_flow","id":"1"}"#),
            Ok(ControlEvent::FlowUpdated(_))
        ));
        assert_eq!(
            parse_control(r#"{"type":"intercept_stopped"}"#).unwrap(),
            ControlEvent::InterceptionStopped { port: None }
        );
    }

    #[test]
    fn test_interception_status() {
        assert_eq!(
            parse_control(r#"{"type":"interception_status","status":"started","port":8888}"#).unwrap(),
            ControlEvent::InterceptionStarted { port: Some(8888) }
        );
        assert!(matches!(
            parse_control(r#"{"type":"interception_status","status":"paused"}"#),
            Err(PipelineError::UnparseableControlMessage(_))
        ));
    }

    #[test]
    fn test_double_encoded_pong() {
        let frame = serde_json::to_string(r#"{"type": "pong"}"#).unwrap();
        assert_eq!(parse_control(&frame).unwrap(), ControlEvent::Pong);
    }

    #[test]
    fn test_invalid_text_is_rejected() {
        for frame in ["{not json", "[1,2]", r#"{"kind":"message"}"#, r#"{"type":"reboot"}"#] {
            assert!(
                matches!(parse_control(frame), Err(PipelineError::UnparseableControlMessage(_))),
                "frame {} should be rejected",
                frame
            );
        }
    }

    #[test]
    fn test_encode_ping() {
        let text = encode_control(&ControlMessage::Ping { timestamp: 42 }).unwrap();
        assert_eq!(text, r#"{"type":"ping","timestamp":42}"#);
        assert_eq!(encode_control(&ControlMessage::Pong).unwrap(), r#"{"type":"pong"}"#);
    }
}
