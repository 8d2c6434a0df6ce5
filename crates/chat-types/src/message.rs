//! Chat message model and delivery lifecycle.

use crate::TenantId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery status of a chat message.
///
/// Advances monotonically `Sending -> Sent -> Delivered -> Read`; the only
/// permitted rollback is into `Failed` (send rejection or ack timeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    fn rank(self) -> u8 {
        match self {
            MessageStatus::Sending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
            MessageStatus::Failed => 4,
        }
    }

    /// Whether a transition from `self` to `next` is allowed.
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        if self == MessageStatus::Failed {
            return false;
        }
        if next == MessageStatus::Failed {
            return true;
        }
        next.rank() > self.rank()
    }
}

/// A single chat message, optimistic or confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server-assigned id; absent until the send is acknowledged.
    pub id: Option<String>,
    /// Client-assigned placeholder id, always present for outgoing messages.
    pub temp_id: String,
    pub content: String,
    pub sender_tenant_id: TenantId,
    pub receiver_tenant_id: TenantId,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Composite dedup key over id, participants and timestamp.
    ///
    /// Identical re-deliveries of the same wire event produce identical keys.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.id.as_deref().unwrap_or("-"),
            self.sender_tenant_id,
            self.receiver_tenant_id,
            self.created_at.timestamp_millis(),
        )
    }

    /// The conversation partner from `my` tenant's point of view.
    pub fn counterpart(&self, my: &TenantId) -> TenantId {
        if &self.sender_tenant_id == my {
            self.receiver_tenant_id.clone()
        } else {
            self.sender_tenant_id.clone()
        }
    }
}

/// A conversation summary row from the request surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub tenant_id: TenantId,
    pub tenant_name: String,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread: u32,
}

/// Aggregate notification counts from the request surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationSummary {
    pub unread_messages: u32,
    pub unread_notifications: u32,
}
