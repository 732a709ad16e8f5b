//! Outbound messages sent by trigger states

use super::{Headers, MsgEvent, Protocol};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An outbound protocol message as modeled in a pattern.
///
/// `url` and `content` may contain `%counter.<state>%` macros and `url` may
/// contain `$$...$$` references; both are resolved into a fresh copy before
/// the message is handed to a [`MessageInvoker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub protocol: Protocol,

    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub target: Option<String>,

    pub url: String,

    /// Resource path (HTTP/CoAP) or topic (MQTT)
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub method: Option<String>,

    #[serde(default)]
    pub content_type: Option<String>,

    #[serde(default)]
    pub content: Option<String>,

    #[serde(default)]
    pub headers: Headers,
}

impl Message {
    pub fn new(protocol: Protocol, url: impl Into<String>) -> Self {
        Self {
            protocol,
            source: None,
            target: None,
            url: url.into(),
            path: None,
            method: None,
            content_type: None,
            content: None,
            headers: Headers::new(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_content(mut self, content_type: impl Into<String>, content: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self.content = Some(content.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Get a short display string
    pub fn describe(&self) -> String {
        let method = self.method.as_deref().unwrap_or("SEND");
        match &self.path {
            Some(path) => format!("{} {} {} ({})", self.protocol, method, self.url, path),
            None => format!("{} {} {}", self.protocol, method, self.url),
        }
    }
}

/// Performs the actual network call for a trigger.
///
/// Implementations live outside the engine (HTTP clients, CoAP stacks, MQTT
/// publishers). A returned event is queued as if it had arrived
/// asynchronously.
#[async_trait]
pub trait MessageInvoker: Send + Sync {
    async fn invoke(&self, message: &Message) -> Result<Option<MsgEvent>>;
}

/// Record of a message the engine sent, kept for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentMessage {
    /// Label of the state that sent it
    pub state: String,
    pub message: Message,
    pub sent_at: DateTime<Utc>,
    /// Whether the invoker produced a response event
    pub answered: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let msg = Message::new(Protocol::Coap, "coap://node/sensors").with_method("GET");
        assert_eq!(msg.describe(), "CoAP GET coap://node/sensors");

        let msg = Message::new(Protocol::Mqtt, "mqtt://broker").with_path("home/temp");
        assert_eq!(msg.describe(), "MQTT SEND mqtt://broker (home/temp)");
    }

    #[test]
    fn test_message_deserialization() {
        let msg: Message = toml::from_str(
            r#"
protocol = "http"
url = "http://server/items"
method = "POST"
content_type = "application/json"
content = '{"id": 1}'
headers = { Accept = "application/json" }
"#,
        )
        .unwrap();

        assert_eq!(msg.protocol, Protocol::Http);
        assert_eq!(msg.method.as_deref(), Some("POST"));
        assert_eq!(msg.headers.get("accept"), Some("application/json"));
    }
}
