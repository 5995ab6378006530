use log::{debug, log_enabled, trace, Level};
use prost::Message;

use crate::codec::wire::{MessageKind, Payload, WireEnvelope, WireFlow, WireHeader};
use crate::models::flow::{Cookie, FlowRecord, HeaderPair};
use crate::utils::error::{PipelineError, PipelineResult};
use crate::utils::format::{elapsed_millis, format_bytes, format_millis};

/// Parses binary flow frames into flow records
pub struct FlowParser {}

impl FlowParser {
    /// Create a new flow parser
    pub fn new() -> Self {
        Self {}
    }

    /// Parse one binary frame into a flow record
    pub fn parse_frame(&self, data: &[u8]) -> PipelineResult<FlowRecord> {
        if log_enabled!(Level::Trace) {
            trace!("Parsing binary frame, size: {} bytes", data.len());
        }

        let envelope = WireEnvelope::decode_length_delimited(data)?;

        match MessageKind::try_from(envelope.data_type) {
            Ok(MessageKind::FlowData) => {}
            Ok(other) => {
                return Err(PipelineError::MalformedFrame(format!(
                    "expected flow data envelope, got {:?} ('{}')",
                    other, envelope.kind
                )));
            }
            Err(_) => {
                return Err(PipelineError::MalformedFrame(format!(
                    "unknown envelope discriminator {}",
                    envelope.data_type
                )));
            }
        }

        match envelope.payload {
            Some(Payload::Flow(flow)) => Ok(self.build_record(flow)),
            Some(Payload::ServerEvent(_)) => Err(PipelineError::MalformedFrame(
                "flow data envelope carries a server event payload".to_string(),
            )),
            None => Err(PipelineError::MalformedFrame(
                "flow data envelope has no payload".to_string(),
            )),
        }
    }

    /// Derive the display fields and build the immutable record
    pub fn build_record(&self, flow: WireFlow) -> FlowRecord {
        let request_headers = Self::extract_headers(flow.request_headers);
        let response_headers = Self::extract_headers(flow.response_headers);
        let cookies = Self::extract_cookies(&response_headers);

        let duration_ms = elapsed_millis(flow.start_timestamp, flow.end_timestamp);

        // 0 is what older senders put on the wire for "no response yet"
        let status = flow
            .status
            .filter(|s| *s > 0)
            .and_then(|s| u16::try_from(s).ok());

        if log_enabled!(Level::Debug) {
            debug!(
                "Decoded flow {} {} {} ({} request headers, {} response headers)",
                flow.id,
                flow.method,
                flow.url,
                request_headers.len(),
                response_headers.len()
            );
        }

        FlowRecord {
            id: flow.id,
            method: flow.method,
            url: flow.url,
            status,
            start_timestamp: flow.start_timestamp,
            end_timestamp: flow.end_timestamp,
            duration_ms,
            duration: format_millis(duration_ms),
            request_headers,
            response_headers,
            request_body: flow.request_body,
            response_body: flow.response_body,
            cookies,
            request_size: flow.request_size,
            response_size: flow.response_size,
            request_size_display: format_bytes(flow.request_size),
            response_size_display: format_bytes(flow.response_size),
            is_intercepted: flow.is_intercepted,
        }
    }

    /// Keep only pairs that carry both a name and a value
    fn extract_headers(headers: Vec<WireHeader>) -> Vec<HeaderPair> {
        headers
            .into_iter()
            .filter_map(|h| match (h.key, h.value) {
                (Some(name), Some(value)) if !name.is_empty() && !value.is_empty() => {
                    Some(HeaderPair { name, value })
                }
                _ => None,
            })
            .collect()
    }

    /// Split every `Set-Cookie` value into key/value segments
    pub fn extract_cookies(response_headers: &[HeaderPair]) -> Vec<Cookie> {
        response_headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case("set-cookie"))
            .flat_map(|h| h.value.split(';'))
            .filter_map(|segment| {
                let (name, value) = segment.split_once('=')?;
                let (name, value) = (name.trim(), value.trim());
                if name.is_empty() || value.is_empty() {
                    return None;
                }
                Some(Cookie {
                    name: name.to_string(),
                    value: value.to_string(),
                })
            })
            .collect()
    }

    /// Turn a record back into its wire form
    pub fn to_wire(record: &FlowRecord) -> WireFlow {
        let headers = |list: &[HeaderPair]| {
            list.iter()
                .map(|h| WireHeader {
                    key: Some(h.name.clone()),
                    value: Some(h.value.clone()),
                })
                .collect()
        };

        WireFlow {
            id: record.id.clone(),
            method: record.method.clone(),
            url: record.url.clone(),
            status: record.status.map(i32::from),
            start_timestamp: record.start_timestamp,
            end_timestamp: record.end_timestamp,
            request_size: record.request_size,
            response_size: record.response_size,
            request_headers: headers(&record.request_headers),
            response_headers: headers(&record.response_headers),
            request_body: record.request_body.clone(),
            response_body: record.response_body.clone(),
            is_intercepted: record.is_intercepted,
        }
    }
}

impl Default for FlowParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(key: Option<&str>, value: Option<&str>) -> WireHeader {
        WireHeader {
            key: key.map(str::to_string),
            value: value.map(str::to_string),
        }
    }

    fn sample_flow() -> WireFlow {
        WireFlow {
            id: "abc".to_string(),
            method: "POST".to_string(),
            url: "https://api.example.com/login".to_string(),
            status: Some(200),
            start_timestamp: 1_700_000_000.0,
            end_timestamp: 1_700_000_000.5,
            request_size: 1536,
            response_size: 0,
            request_headers: vec![
                header(Some("Content-Type"), Some("application/json")),
                header(Some("X-Empty"), None),
                header(None, Some("orphan")),
            ],
            response_headers: vec![
                header(Some("Set-Cookie"), Some("session=xyz; Path=/; HttpOnly")),
                header(Some("set-cookie"), Some(" theme = dark ;=nokey; novalue=")),
                header(Some("Content-Length"), Some("0")),
            ],
            request_body: r#"{"user":"a"}"#.to_string(),
            response_body: String::new(),
            is_intercepted: true,
        }
    }

    #[test]
    fn test_parse_flow_frame() {
        let parser = FlowParser::new();
        let frame = WireEnvelope::flow(sample_flow()).to_frame();

        let record = parser.parse_frame(&frame).unwrap();
        assert_eq!(record.id, "abc");
        assert_eq!(record.status, Some(200));
        assert_eq!(record.duration_ms, 500.0);
        assert_eq!(record.duration, "500 ms");
        assert_eq!(record.request_size_display, "1.5 KB");
        assert_eq!(record.response_size_display, "0 B");
        assert!(record.is_intercepted);
    }

    #[test]
    fn test_headers_missing_a_side_are_skipped() {
        let record = FlowParser::new().build_record(sample_flow());
        assert_eq!(
            record.request_headers,
            vec![HeaderPair::new("Content-Type", "application/json")]
        );
        assert_eq!(record.response_headers.len(), 3);
    }

    #[test]
    fn test_cookie_extraction() {
        let record = FlowParser::new().build_record(sample_flow());
        let names: Vec<(&str, &str)> = record
            .cookies
            .iter()
            .map(|c| (c.name.as_str(), c.value.as_str()))
            .collect();
        assert_eq!(names, vec![("session", "xyz"), ("Path", "/"), ("theme", "dark")]);
    }

    #[test]
    fn test_cookie_value_keeps_later_equals() {
        let headers = vec![HeaderPair::new("SET-COOKIE", "token=a=b==")];
        let cookies = FlowParser::extract_cookies(&headers);
        assert_eq!(cookies[0].value, "a=b==");
    }

    #[test]
    fn test_zero_status_means_in_flight() {
        let mut flow = sample_flow();
        flow.status = Some(0);
        flow.end_timestamp = 0.0;
        let record = FlowParser::new().build_record(flow);
        assert_eq!(record.status, None);
        assert_eq!(record.duration_ms, 0.0);
    }

    #[test]
    fn test_server_event_envelope_is_malformed() {
        let frame = WireEnvelope::server_event("started", 8888).to_frame();
        let err = FlowParser::new().parse_frame(&frame).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedFrame(_)));
    }

    #[test]
    fn test_flow_discriminator_without_payload_is_malformed() {
        let envelope = WireEnvelope {
            kind: "flow_event".to_string(),
            data_type: MessageKind::FlowData as i32,
            payload: None,
        };
        let err = FlowParser::new().parse_frame(&envelope.to_frame()).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedFrame(_)));
    }

    #[test]
    fn test_unknown_discriminator_is_malformed() {
        let mut envelope = WireEnvelope::flow(sample_flow());
        envelope.data_type = 42;
        let err = FlowParser::new().parse_frame(&envelope.to_frame()).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedFrame(_)));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = FlowParser::new().parse_frame(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedFrame(_)));
    }

    #[test]
    fn test_semantic_round_trip() {
        let parser = FlowParser::new();
        let record = parser.build_record(sample_flow());
        let again = parser
            .parse_frame(&WireEnvelope::flow(FlowParser::to_wire(&record)).to_frame())
            .unwrap();
        assert_eq!(again, record);
    }
}
