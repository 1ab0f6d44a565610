//! Values carried over and returned by the bus.

use bastion_core::ModuleId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One message in a channel log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Unique message ID.
    pub id: Uuid,
    /// Channel the message was published to.
    pub channel: String,
    /// Publishing module.
    pub sender: ModuleId,
    /// Opaque payload.
    pub payload: serde_json::Value,
    /// When the message was appended.
    pub timestamp: DateTime<Utc>,
}

impl ChannelMessage {
    pub(crate) fn new(channel: &str, sender: ModuleId, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.to_owned(),
            sender,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// The event name a recipient module sees this message under.
    #[must_use]
    pub fn event_name(&self) -> String {
        format!("channel:{}", self.channel)
    }
}

/// Outcome of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    /// ID of the appended message.
    pub message_id: Uuid,
    /// Subscribers whose mailbox accepted the message.
    pub delivered_to: Vec<ModuleId>,
    /// Subscribers with no open mailbox.
    pub undelivered: Vec<ModuleId>,
}

/// Read-only view of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel name.
    pub name: String,
    /// Module that created the channel.
    pub creator: ModuleId,
    /// Current subscribers, sorted.
    pub subscribers: Vec<ModuleId>,
    /// Messages currently held in the log.
    pub message_count: usize,
}
