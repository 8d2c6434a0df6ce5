//! Typed frames exchanged over the chat channel.
//!
//! The wire framing itself (WebSocket, loopback, ...) is a transport concern;
//! these enums are the application-level protocol. Frames are internally
//! tagged so every event carries a closed, typed payload.

use crate::{ChatMessage, MessageStatus, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Frames the client sends to the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Authentication handshake, first frame after transport connect.
    Auth { token: String },
    /// Join the conversation with a remote tenant.
    Join { tenant_id: TenantId },
    /// Leave the conversation with a remote tenant.
    Leave { tenant_id: TenantId },
    /// Send a message; acknowledged by `MessageAck` or `MessageErr`.
    SendMessage {
        temp_id: String,
        receiver_tenant_id: TenantId,
        content: String,
    },
    /// Typing indicator for the given conversation.
    Typing { tenant_id: TenantId, started: bool },
}

/// Frames the channel pushes to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Connection confirmation carrying the authenticated identity.
    AuthOk {
        tenant_id: TenantId,
        tenant_name: String,
        user_id: String,
        user_name: String,
        socket_id: String,
    },
    /// Authentication was rejected by the server.
    AuthErr { reason: String },
    Joined { tenant_id: TenantId },
    Left { tenant_id: TenantId },
    /// Success acknowledgement for a `SendMessage`, carrying the server id.
    MessageAck { temp_id: String, id: String },
    /// Error acknowledgement for a `SendMessage`.
    MessageErr { temp_id: String, reason: String },
    /// An inbound message (including server echoes of our own sends).
    NewMessage { message: WireMessage },
    /// Delivery/read/failure receipt for a previously acknowledged message.
    Receipt { id: String, status: MessageStatus },
    Typing { tenant_id: TenantId, started: bool },
    /// Out-of-band chat notification.
    Notification { kind: String, body: String },
}

/// Message payload as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: String,
    pub sender_tenant_id: TenantId,
    pub receiver_tenant_id: TenantId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl WireMessage {
    /// Materialize an inbound wire message as a `Delivered` chat message.
    pub fn into_message(self) -> ChatMessage {
        ChatMessage {
            id: Some(self.id.clone()),
            temp_id: format!("srv-{}", self.id),
            content: self.content,
            sender_tenant_id: self.sender_tenant_id,
            receiver_tenant_id: self.receiver_tenant_id,
            status: MessageStatus::Delivered,
            created_at: self.created_at,
        }
    }
}
