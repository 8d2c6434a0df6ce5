//! Events published by the engine for UI consumers.

use crate::{ChatMessage, TenantId};
use serde::{Deserialize, Serialize};

/// Classification for terminal errors surfaced on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    AuthExpired,
    Connection,
    Mapping,
    Send,
    Validation,
}

/// Events emitted on the engine event bus.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Transport connected (pre-authentication).
    Connected,
    /// Authentication handshake succeeded.
    Authenticated {
        tenant_id: TenantId,
        user_id: String,
    },
    /// Transport dropped or was torn down.
    Disconnected { reason: Option<String> },
    /// The server rejected the credential.
    AuthFailed { reason: String },
    /// Reconnection gave up after exhausting the attempt budget.
    ReconnectExhausted { attempts: u32 },
    /// A conversation was opened and joined.
    ConversationOpened { tenant_id: TenantId },
    /// An existing timeline entry changed (status, server id).
    MessageUpdated(ChatMessage),
    /// A new inbound message was appended to a timeline.
    MessageReceived(ChatMessage),
    Typing {
        tenant_id: TenantId,
        started: bool,
    },
    /// Unread count changed for a conversation.
    UnreadChanged { tenant_id: TenantId, unread: u32 },
    /// Out-of-band chat notification from the channel.
    Notification { kind: String, body: String },
    /// A terminal error the UI must act on (retry, fix link, re-login).
    Fault { kind: FaultKind, message: String },
}
