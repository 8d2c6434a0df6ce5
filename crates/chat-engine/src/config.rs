//! Engine configuration with environment overrides.

use crate::{EngineError, EngineResult};
use chat_relay::RelayConfig;
use party_mapping::ResolverOptions;
use std::time::Duration;
use url::Url;

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Connection manager configuration.
    pub relay: RelayConfig,
    /// Base URL of the request surface.
    pub api_base_url: Url,
    /// Per-request timeout for the request surface.
    pub http_timeout: Duration,
    /// Maximum message length in characters.
    pub max_message_len: usize,
    /// How long a send waits for its acknowledgement.
    pub ack_timeout: Duration,
    /// Bounded dedup window size, in composite keys.
    pub dedup_capacity: usize,
    /// Window within which a server echo reconciles an optimistic placeholder.
    pub reconcile_window: Duration,
    /// History cache TTL.
    pub history_ttl: Duration,
    /// Conversation list cache TTL.
    pub conversations_ttl: Duration,
    /// Notification summary cache TTL.
    pub notifications_ttl: Duration,
    /// Interval between cache sweeps.
    pub sweep_interval: Duration,
    /// Max entry age enforced by the sweep.
    pub sweep_max_age: Duration,
    /// Page size used when opening a chat.
    pub history_page_limit: u32,
    /// Resolver behavior switches.
    pub resolver: ResolverOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            api_base_url: Url::parse("https://api.shoptalk.dev/")
                .expect("hard-coded default URL is valid"),
            http_timeout: Duration::from_secs(10),
            max_message_len: 5000,
            ack_timeout: Duration::from_secs(10),
            dedup_capacity: 512,
            reconcile_window: Duration::from_secs(30),
            history_ttl: Duration::from_secs(60),
            conversations_ttl: Duration::from_secs(60),
            notifications_ttl: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(300),
            sweep_max_age: Duration::from_secs(900),
            history_page_limit: 50,
            resolver: ResolverOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden from the environment.
    ///
    /// Recognized variables: `SHOPTALK_CHAT_URL`, `SHOPTALK_API_URL`,
    /// `SHOPTALK_ACK_TIMEOUT_SECS`, `SHOPTALK_MAX_RECONNECT_ATTEMPTS`.
    pub fn from_env() -> EngineResult<Self> {
        let mut config = Self::default();

        if let Ok(chat_url) = std::env::var("SHOPTALK_CHAT_URL") {
            config.relay.url = chat_url;
        }
        if let Ok(api_url) = std::env::var("SHOPTALK_API_URL") {
            config.api_base_url = Url::parse(&api_url)
                .map_err(|e| EngineError::Config(format!("SHOPTALK_API_URL: {e}")))?;
        }
        if let Ok(raw) = std::env::var("SHOPTALK_ACK_TIMEOUT_SECS") {
            let secs: u64 = raw
                .parse()
                .map_err(|e| EngineError::Config(format!("SHOPTALK_ACK_TIMEOUT_SECS: {e}")))?;
            config.ack_timeout = Duration::from_secs(secs);
        }
        if let Ok(raw) = std::env::var("SHOPTALK_MAX_RECONNECT_ATTEMPTS") {
            config.relay.max_reconnect_attempts = raw.parse().map_err(|e| {
                EngineError::Config(format!("SHOPTALK_MAX_RECONNECT_ATTEMPTS: {e}"))
            })?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_product_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.max_message_len, 5000);
        assert_eq!(config.ack_timeout, Duration::from_secs(10));
        assert_eq!(config.dedup_capacity, 512);
        assert_eq!(config.history_ttl, Duration::from_secs(60));
        assert_eq!(config.conversations_ttl, Duration::from_secs(60));
        assert_eq!(config.notifications_ttl, Duration::from_secs(30));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert!(config.resolver.allow_ambiguous_fallback);
    }
}
