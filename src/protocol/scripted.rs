//! Scripted invokers for headless runs and tests
//!
//! No network traffic is generated: responses are replayed in order from a
//! prepared list.

use super::{Message, MessageInvoker, MsgEvent};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;

/// Invoker that never produces a response
#[derive(Debug, Default)]
pub struct NoopInvoker;

#[async_trait]
impl MessageInvoker for NoopInvoker {
    async fn invoke(&self, message: &Message) -> Result<Option<MsgEvent>> {
        tracing::debug!("Not sending {} (no-op invoker)", message.describe());
        Ok(None)
    }
}

/// Invoker returning canned responses in order and recording every call
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    responses: Mutex<VecDeque<Option<MsgEvent>>>,
    calls: Mutex<Vec<Message>>,
}

impl ScriptedInvoker {
    pub fn new(responses: impl IntoIterator<Item = Option<MsgEvent>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Load responses from a JSON array of events (or `null` for no response)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let responses: Vec<Option<MsgEvent>> = serde_json::from_str(&contents).map_err(|e| {
            Error::InvalidContent(format!("Failed to parse responses file {:?}: {}", path, e))
        })?;
        Ok(Self::new(responses))
    }

    /// Messages received so far, in call order
    pub fn calls(&self) -> Vec<Message> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl MessageInvoker for ScriptedInvoker {
    async fn invoke(&self, message: &Message) -> Result<Option<MsgEvent>> {
        self.calls.lock().push(message.clone());
        let response = self.responses.lock().pop_front().flatten();
        tracing::debug!(
            "Scripted send {} -> {}",
            message.describe(),
            if response.is_some() { "response" } else { "no response" }
        );
        Ok(response)
    }
}
