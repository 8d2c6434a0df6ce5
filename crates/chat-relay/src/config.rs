//! Relay client configuration.

use std::time::Duration;

/// Connection manager configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Chat channel URL (e.g. wss://chat.shoptalk.dev/channel).
    pub url: String,
    /// Timeout for the auth handshake after transport connect.
    pub handshake_timeout: Duration,
    /// Base reconnect delay.
    pub reconnect_base_delay: Duration,
    /// Cap applied to the exponential backoff.
    pub reconnect_max_delay: Duration,
    /// Maximum reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "wss://chat.shoptalk.dev/channel".to_string(),
            handshake_timeout: Duration::from_secs(10),
            reconnect_base_delay: Duration::from_secs(2),
            reconnect_max_delay: Duration::from_secs(30),
            max_reconnect_attempts: 10,
        }
    }
}
