//! Core data models for captured protocol messages
//!
//! This module defines the normalized message event the engine consumes,
//! independent of the protocol (HTTP, CoAP, MQTT, SOAP) it was captured from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Protocol a message was captured from or is sent over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Coap,
    Mqtt,
    Soap,
    #[default]
    Other,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Protocol::Http => "HTTP",
            Protocol::Coap => "CoAP",
            Protocol::Mqtt => "MQTT",
            Protocol::Soap => "SOAP",
            Protocol::Other => "OTHER",
        };
        write!(f, "{}", name)
    }
}

/// Header / parameter map with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any existing entry that differs only in case
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.0.retain(|k, _| !k.eq_ignore_ascii_case(&name));
        self.0.insert(name, value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// Body format used to select XPath or JSONPath extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Json,
    Xml,
    Plain,
}

/// Typed message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "body", rename_all = "lowercase")]
pub enum Content {
    #[default]
    Empty,
    Plain(String),
    Json(serde_json::Value),
    Xml(String),
}

impl Content {
    /// Body as text, JSON bodies re-serialized
    pub fn as_text(&self) -> String {
        match self {
            Content::Empty => String::new(),
            Content::Plain(s) | Content::Xml(s) => s.clone(),
            Content::Json(v) => v.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Empty => true,
            Content::Plain(s) | Content::Xml(s) => s.is_empty(),
            Content::Json(v) => v.is_null(),
        }
    }

    /// Format implied by the variant alone
    pub fn format(&self) -> ContentFormat {
        match self {
            Content::Json(_) => ContentFormat::Json,
            Content::Xml(_) => ContentFormat::Xml,
            Content::Empty | Content::Plain(_) => ContentFormat::Plain,
        }
    }
}

/// A normalized captured message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsgEvent {
    /// Protocol the message was captured from
    #[serde(default)]
    pub protocol: Protocol,

    /// Sending endpoint, if known
    #[serde(default)]
    pub source: Option<String>,

    /// Receiving endpoint, if known
    #[serde(default)]
    pub target: Option<String>,

    /// Headers, options or parameters (status codes included)
    #[serde(default)]
    pub headers: Headers,

    /// Message body
    #[serde(default)]
    pub content: Content,

    /// Round-trip time when the event is a response to a sent message
    #[serde(default)]
    pub response_time_ms: Option<u64>,

    /// Capture timestamp
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl MsgEvent {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            source: None,
            target: None,
            headers: Headers::new(),
            content: Content::Empty,
            response_time_ms: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.content = content;
        self
    }

    pub fn with_endpoints(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self.target = Some(target.into());
        self
    }

    pub fn with_response_time(mut self, millis: u64) -> Self {
        self.response_time_ms = Some(millis);
        self
    }

    /// Body format, preferring the declared content type over the body variant
    pub fn content_format(&self) -> ContentFormat {
        let declared = self
            .headers
            .get("content-type")
            .or_else(|| self.headers.get("content-format"))
            .map(|ct| ct.to_ascii_lowercase());

        match declared {
            Some(ct) if ct.contains("json") => ContentFormat::Json,
            Some(ct) if ct.contains("xml") => ContentFormat::Xml,
            _ => self.content.format(),
        }
    }

    /// One-line description used in transcripts
    pub fn summary(&self) -> String {
        let mut parts = vec![self.protocol.to_string()];
        if let (Some(source), Some(target)) = (&self.source, &self.target) {
            parts.push(format!("{} -> {}", source, target));
        }
        if let Some(status) = self.headers.get("status") {
            parts.push(format!("status={}", status));
        }
        if let Some(method) = self.headers.get("method") {
            parts.push(format!("method={}", method));
        }
        parts.push(format!("{} header(s)", self.headers.len()));
        if !self.content.is_empty() {
            parts.push(format!("{:?} body", self.content.format()).to_lowercase());
        }
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/json");
        assert_eq!(headers.get("content-type"), Some("application/json"));

        headers.insert("CONTENT-TYPE", "text/plain");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
    }

    #[test]
    fn test_content_format_prefers_declared_type() {
        let event = MsgEvent::new(Protocol::Http)
            .with_header("Content-Type", "application/xml")
            .with_content(Content::Plain("<a>1</a>".to_string()));
        assert_eq!(event.content_format(), ContentFormat::Xml);

        let event = MsgEvent::new(Protocol::Coap).with_content(Content::Json(json!({"a": 1})));
        assert_eq!(event.content_format(), ContentFormat::Json);
    }

    #[test]
    fn test_event_deserialization_defaults() {
        let event: MsgEvent = serde_json::from_str(
            r#"{"protocol": "mqtt", "headers": {"topic": "sensors/1"},
                "content": {"type": "json", "body": {"temp": 21}}}"#,
        )
        .unwrap();

        assert_eq!(event.protocol, Protocol::Mqtt);
        assert_eq!(event.headers.get("Topic"), Some("sensors/1"));
        assert_eq!(event.content, Content::Json(json!({"temp": 21})));
        assert!(event.response_time_ms.is_none());
    }

    #[test]
    fn test_summary() {
        let event = MsgEvent::new(Protocol::Http).with_header("status", "200");
        assert_eq!(event.summary(), "HTTP, status=200, 1 header(s)");

        let event = MsgEvent::new(Protocol::Coap)
            .with_endpoints("client", "node")
            .with_header("code", "2.05");
        assert_eq!(event.source.as_deref(), Some("client"));
        assert_eq!(event.summary(), "CoAP, client -> node, 1 header(s)");
    }
}
