use serde::{Deserialize, Serialize};

/// A single header as it appeared on the wire. Names repeat (e.g. `Set-Cookie`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderPair {
    pub name: String,
    pub value: String,
}

impl HeaderPair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A cookie key/value pulled out of a `Set-Cookie` response header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

/// One captured request/response exchange.
///
/// Only the codec builds these. Once built they are shared behind an `Arc`
/// and never modified; a later record with the same id is a new entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    /// Identifier assigned by the interception backend
    pub id: String,

    /// HTTP method
    pub method: String,

    /// Full request URL
    pub url: String,

    /// Response status, absent while the exchange is in flight
    pub status: Option<u16>,

    /// Request start, seconds in the backend's clock
    pub start_timestamp: f64,

    /// Response end, seconds in the backend's clock (0 while in flight)
    pub end_timestamp: f64,

    /// Elapsed time between start and end
    pub duration_ms: f64,

    /// `duration_ms` rendered for display
    pub duration: String,

    pub request_headers: Vec<HeaderPair>,
    pub response_headers: Vec<HeaderPair>,

    pub request_body: String,
    pub response_body: String,

    /// Parsed from `Set-Cookie` response headers
    pub cookies: Vec<Cookie>,

    pub request_size: u64,
    pub response_size: u64,

    /// Human-readable request size (e.g. "1.5 KB")
    pub request_size_display: String,

    /// Human-readable response size
    pub response_size_display: String,

    /// Whether the backend held this exchange for interception
    pub is_intercepted: bool,
}

impl FlowRecord {
    /// First request header whose name matches case-insensitively
    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.request_headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Status as display text, empty while in flight
    pub fn status_text(&self) -> String {
        self.status.map(|s| s.to_string()).unwrap_or_default()
    }
}
