//! Payload types the brain and its adapters agree on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dispatched once before any externally produced event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitEvent;

/// Dispatched once after the queue drained, right before the loop returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownEvent;

/// Emitted by an adapter whenever the bot sees a new chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiveMessageEvent {
    /// Unique at least within `channel`.
    pub id: String,
    pub text: String,
    pub author_id: String,
    pub channel: String,
    pub received_at: DateTime<Utc>,
    /// Adapter specific extras. Each adapter documents what it puts here.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl ReceiveMessageEvent {
    pub fn new(text: impl Into<String>, author_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            author_id: author_id.into(),
            channel: String::new(),
            received_at: Utc::now(),
            data: None,
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }
}
