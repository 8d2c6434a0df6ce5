//! Session state owned by the connection manager.

use chat_types::TenantId;
use chrono::{DateTime, Utc};

/// Connection state machine.
///
/// `Disconnected -> Connecting -> Authenticating -> Authenticated`; a
/// transport drop moves `Authenticated -> Reconnecting`; exhausting the retry
/// budget or a terminal credential failure moves to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Authenticated,
    Reconnecting,
    Failed,
}

/// Coarse health classification derived from the connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHealth {
    /// Authenticated and pumping frames.
    Healthy,
    /// A transition or recovery is in progress.
    Degraded,
    /// Nothing usable; a manual `connect()` is required.
    Down,
}

impl ConnectionState {
    /// Health classification for this state.
    pub fn health(self) -> ConnectionHealth {
        match self {
            ConnectionState::Authenticated => ConnectionHealth::Healthy,
            ConnectionState::Connecting
            | ConnectionState::Authenticating
            | ConnectionState::Reconnecting => ConnectionHealth::Degraded,
            ConnectionState::Disconnected | ConnectionState::Failed => ConnectionHealth::Down,
        }
    }
}

/// The engine-side view of the authenticated session.
#[derive(Debug, Clone)]
pub struct Session {
    pub state: ConnectionState,
    pub tenant_id: Option<TenantId>,
    pub tenant_name: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub socket_id: Option<String>,
    pub last_auth_at: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
}

impl Session {
    /// A fresh, disconnected session.
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            tenant_id: None,
            tenant_name: None,
            user_id: None,
            user_name: None,
            socket_id: None,
            last_auth_at: None,
            reconnect_attempts: 0,
        }
    }

    /// Health classification of the current state.
    pub fn health(&self) -> ConnectionHealth {
        self.state.health()
    }

    /// Clear the authenticated identity, keeping state and attempt counter.
    pub fn clear_identity(&mut self) {
        self.tenant_id = None;
        self.tenant_name = None;
        self.user_id = None;
        self.user_name = None;
        self.socket_id = None;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
